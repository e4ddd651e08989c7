use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::disk::gpt::partition_device_path;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/abgrow.toml";
pub const GENERATED_CONFIG_PATH: &str = ".abgrow.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub bootloader: BootloaderConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(skip)]
    raw: toml::Table,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Whole-disk device holding the boot and root partitions.
    pub root_device: PathBuf,
    /// Boot partition node, defaults to partition 1 of `root_device`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_partition: Option<PathBuf>,
    /// Active root partition, detected from the mount table when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_partition: Option<PathBuf>,
    /// Bind mount of the host root, for when this process runs in a
    /// container whose `/` is not the host's.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_bind_mount: Option<PathBuf>,
    /// Logical sector size override. Block devices report their own; image
    /// files default to 512.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector_size: Option<u64>,
    pub tmp_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            root_device: PathBuf::from("/dev/mmcblk0"),
            boot_partition: None,
            root_partition: None,
            host_bind_mount: None,
            sector_size: None,
            tmp_dir: PathBuf::from("/tmp"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub boot: String,
    pub root_a: String,
    pub root_b: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            boot: "boot".to_string(),
            root_a: "rootA".to_string(),
            root_b: "rootB".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BootloaderKind {
    /// `key=value` environment file read by U-Boot.
    #[default]
    Uenv,
    /// Kernel command line file with a `root=` argument.
    Cmdline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootloaderConfig {
    pub kind: BootloaderKind,
    pub path: PathBuf,
    /// Variable holding the root partition number (`uenv` only).
    pub variable: String,
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        Self {
            kind: BootloaderKind::Uenv,
            path: PathBuf::from("/mnt/boot/uEnv.txt"),
            variable: "root_part".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub mount: PathBuf,
    pub umount: PathBuf,
    pub partx: PathBuf,
    pub udevd: PathBuf,
    pub udevadm: PathBuf,
    pub udev_control: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            mount: PathBuf::from("mount"),
            umount: PathBuf::from("umount"),
            partx: PathBuf::from("partx"),
            udevd: PathBuf::from("/lib/systemd/systemd-udevd"),
            udevadm: PathBuf::from("udevadm"),
            udev_control: PathBuf::from("/run/udev/control"),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let mut config: AppConfig = toml::from_str(content)?;
        config.raw = toml::from_str(content)?;
        Ok(config)
    }

    /// Raw `key` of `section` as written in the file, section matched
    /// case-insensitively.
    pub fn get_item(&self, section: &str, key: &str) -> Option<String> {
        let (_, table) = self
            .raw
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(section))?;
        match table.as_table()?.get(key)? {
            toml::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn boot_partition_path(&self) -> PathBuf {
        self.general
            .boot_partition
            .clone()
            .unwrap_or_else(|| partition_device_path(&self.general.root_device, 1))
    }

    /// Directory the running system's root filesystem is reachable at.
    /// An empty `host_bind_mount` means the host root itself.
    pub fn live_root(&self) -> PathBuf {
        self.get_item("general", "host_bind_mount")
            .map(PathBuf::from)
            .or_else(|| self.general.host_bind_mount.clone())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    pub fn generate_config_file(force: bool) -> anyhow::Result<()> {
        use std::io::Write;

        let config_path = GENERATED_CONFIG_PATH;

        if Path::new(config_path).exists() && !force {
            anyhow::bail!("Configuration file {} already exists. Use --force to overwrite.", config_path);
        }

        let config_content = Self::generate_full_config()?;

        let mut file = fs::File::create(config_path)?;
        file.write_all(config_content.as_bytes())?;

        info!("Configuration file generated: {}", config_path);
        info!("Copy it to {} and edit it to match the device", DEFAULT_CONFIG_PATH);
        Ok(())
    }

    pub fn generate_full_config() -> anyhow::Result<String> {
        let mut config = AppConfig::default();
        config.general.boot_partition = Some(partition_device_path(&config.general.root_device, 1));
        let toml_content = toml::to_string_pretty(&config)?;
        Ok(format!("# abgrow configuration file\n# All fields are optional, missing ones fall back to the defaults shown here\n\n{}", toml_content))
    }
}
