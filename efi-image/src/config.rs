// Image execution configuration and shim policy settings

use spin::RwLock;

/// Base name substituted into the default boot filename to name the
/// second stage loader that shim looks for.
pub const DEFAULT_SECOND_STAGE_BASE: &str = "GRUB";

/// Removable media boot filename for the running architecture
#[cfg(target_arch = "x86_64")]
pub const DEFAULT_BOOT_FILENAME: &str = "BOOTX64.EFI";
#[cfg(target_arch = "x86")]
pub const DEFAULT_BOOT_FILENAME: &str = "BOOTIA32.EFI";
#[cfg(target_arch = "aarch64")]
pub const DEFAULT_BOOT_FILENAME: &str = "BOOTAA64.EFI";
#[cfg(target_arch = "arm")]
pub const DEFAULT_BOOT_FILENAME: &str = "BOOTARM.EFI";
#[cfg(target_arch = "riscv64")]
pub const DEFAULT_BOOT_FILENAME: &str = "BOOTRISCV64.EFI";
#[cfg(target_arch = "loongarch64")]
pub const DEFAULT_BOOT_FILENAME: &str = "BOOTLOONGARCH64.EFI";
#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "x86",
    target_arch = "aarch64",
    target_arch = "arm",
    target_arch = "riscv64",
    target_arch = "loongarch64"
)))]
pub const DEFAULT_BOOT_FILENAME: &str = "BOOT.EFI";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecConfig {
    /// Leave the shim lock protocol locked, so that shim insists on a
    /// second stage loader verifying the next binary.
    pub require_loader: bool,
    /// Leave the firmware's PXE base code running on the SNP device.
    /// Shim prefers it over our file protocol and would otherwise
    /// redownload everything via TFTP.
    pub allow_pxe: bool,
    /// Replacement for the `BOOT` base of the default boot filename
    pub second_stage_base: &'static str,
}

impl ExecConfig {
    pub const fn new() -> Self {
        Self {
            require_loader: false,
            allow_pxe: false,
            second_stage_base: DEFAULT_SECOND_STAGE_BASE,
        }
    }

    pub fn set_require_loader(&mut self, require: bool) {
        self.require_loader = require;
    }

    pub fn set_allow_pxe(&mut self, allow: bool) {
        self.allow_pxe = allow;
    }

    pub fn set_second_stage_base(&mut self, base: &'static str) {
        self.second_stage_base = base;
    }

    /// Whether the shim lock unlocker should be installed
    pub fn unlock_shim(&self) -> bool {
        !self.require_loader
    }

    /// Whether the firmware PXE base code should be stopped before shim runs
    pub fn inhibit_pxe(&self) -> bool {
        !self.allow_pxe
    }

    /// Apply `shim-*` settings from a space separated option string
    ///
    /// # Example option strings
    /// - `shim-require-loader`
    /// - `shim-allow-pxe=1 shim-require-loader=0`
    pub fn apply_flags(&mut self, flags: &str) {
        for flag in flags.split_whitespace() {
            let (key, value) = match flag.split_once('=') {
                Some((key, value)) => (key, parse_bool(value)),
                None => (flag, Some(true)),
            };
            let Some(value) = value else {
                log::warn!("Ignoring malformed option {}", flag);
                continue;
            };
            match key {
                "shim-require-loader" => self.require_loader = value,
                "shim-allow-pxe" => self.allow_pxe = value,
                _ => log::debug!("Skipping unknown option {}", key),
            }
        }
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "yes" | "on" | "true" => Some(true),
        "0" | "no" | "off" | "false" => Some(false),
        _ => None,
    }
}

static EXEC_CONFIG: RwLock<ExecConfig> = RwLock::new(ExecConfig::new());

/// Current process-wide configuration
pub fn exec_config() -> ExecConfig {
    *EXEC_CONFIG.read()
}

/// Replace the process-wide configuration
pub fn set_exec_config(config: ExecConfig) {
    *EXEC_CONFIG.write() = config;
}
