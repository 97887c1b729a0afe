//! argv fragments for the adb/fastboot subprocess contracts (SPEC_FULL.md §6).

pub const ADB: &str = "adb";
pub const FASTBOOT: &str = "fastboot";

pub const ARG_SERIAL: &str = "-s";
pub const ARG_SHELL: &str = "shell";
pub const ARG_ROOT: &str = "root";
pub const ARG_UNROOT: &str = "unroot";
pub const ARG_CONNECT: &str = "connect";
pub const ARG_USB: &str = "usb";
pub const ARG_TCPIP: &str = "tcpip";
pub const ARG_INSTALL: &str = "install";
pub const ARG_UNINSTALL: &str = "uninstall";
pub const ARG_GETPROP: &str = "getprop";
pub const ARG_REMOUNT: &str = "remount";
pub const ARG_REBOOT: &str = "reboot";
pub const ARG_REBOOT_BOOTLOADER: &str = "reboot-bootloader";
pub const ARG_REBOOT_FASTBOOT: &str = "reboot-fastboot";
pub const ARG_GETVAR: &str = "getvar";
pub const ARG_DISABLE_VERITY: &str = "disable-verity";
pub const ARG_DEVICES: &str = "devices";

/// The framework-availability probe's expected binary, confirmed present via `ls`.
pub const PM_BINARY_PATH: &str = "/system/bin/pm";
