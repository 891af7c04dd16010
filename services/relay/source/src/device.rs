//! Collection device sources.
//!
//! Two sources are provided: tablets attached over USB and reached through
//! an ADB server, and a directory whose subdirectories each stand for one
//! device (mass-storage mounts, dry runs).

use crate::SourceError;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Where the scouting app writes its export
pub const DEFAULT_EXPORT_PATH: &str = "/storage/emulated/0/Download/Robot Scouter/RadioScout.json";

/// An attached collection device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle {
    /// Device serial (ADB) or directory name
    pub serial: String,
}

impl DeviceHandle {
    /// Create a handle
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serial)
    }
}

/// Lists devices and reads their exports
#[async_trait]
pub trait DeviceSource: Send + Sync {
    /// Devices currently attached and ready
    async fn list_devices(&self) -> Result<Vec<DeviceHandle>, SourceError>;

    /// Export file text of a device; [`SourceError::NotFound`] if absent
    async fn read_export(&self, device: &DeviceHandle) -> Result<String, SourceError>;

    /// Human-readable description, for logs
    fn describe(&self) -> String;
}

/// ADB server connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbConfig {
    /// `adb` executable
    pub binary: String,
    /// ADB server host
    pub host: String,
    /// ADB server port
    pub port: u16,
    /// Export file path on the device
    pub export_path: String,
    /// Upper bound for any single adb invocation
    pub command_timeout: Duration,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            binary: "adb".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5037,
            export_path: DEFAULT_EXPORT_PATH.to_string(),
            command_timeout: Duration::from_secs(10),
        }
    }
}

/// Devices reached through the `adb` command line client
pub struct AdbDeviceSource {
    config: AdbConfig,
}

impl AdbDeviceSource {
    /// Create a source
    pub fn new(config: AdbConfig) -> Self {
        Self { config }
    }

    async fn adb(&self, args: &[&str]) -> Result<String, SourceError> {
        let port = self.config.port.to_string();
        let mut command = Command::new(&self.config.binary);
        command
            .args(["-H", self.config.host.as_str(), "-P", port.as_str()])
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.config.command_timeout, command.output())
            .await
            .map_err(|_| SourceError::CommandTimeout(self.config.command_timeout))?
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", self.config.binary, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::Unavailable(format!(
                "adb {} failed ({}): {}{}",
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim(),
                stdout.trim()
            )));
        }
        Ok(stdout)
    }
}

/// Serials of ready devices in `adb devices` output
fn parse_device_list(output: &str) -> Vec<DeviceHandle> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(serial), Some("device")) => Some(DeviceHandle::new(serial)),
                _ => None,
            }
        })
        .collect()
}

#[async_trait]
impl DeviceSource for AdbDeviceSource {
    async fn list_devices(&self) -> Result<Vec<DeviceHandle>, SourceError> {
        let output = self.adb(&["devices"]).await?;
        Ok(parse_device_list(&output))
    }

    async fn read_export(&self, device: &DeviceHandle) -> Result<String, SourceError> {
        let command = format!("cat \"{}\"", self.config.export_path);
        let output = match self
            .adb(&["-s", device.serial.as_str(), "shell", command.as_str()])
            .await
        {
            Ok(output) => output,
            Err(SourceError::Unavailable(message)) if message.contains("No such file") => {
                return Err(SourceError::NotFound(device.serial.clone()));
            }
            Err(e) => return Err(e),
        };

        // Older adb versions exit 0 even when the remote command fails.
        let text = output.trim();
        if text.is_empty() || text.contains("No such file or directory") {
            return Err(SourceError::NotFound(device.serial.clone()));
        }
        debug!("Read {} bytes from {}", text.len(), device);
        Ok(text.to_string())
    }

    fn describe(&self) -> String {
        format!("adb server at {}:{}", self.config.host, self.config.port)
    }
}

/// Each subdirectory of `root` is a device holding the export file
pub struct DirectoryDeviceSource {
    root: PathBuf,
    file_name: String,
}

impl DirectoryDeviceSource {
    /// Create a source over `root`, looking for `file_name` in each device
    pub fn new(root: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            file_name: file_name.into(),
        }
    }

    /// Create a source using the file name of a device export path
    pub fn for_export_path(root: impl Into<PathBuf>, export_path: &str) -> Self {
        let file_name = Path::new(export_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| export_path.to_string());
        Self::new(root, file_name)
    }
}

#[async_trait]
impl DeviceSource for DirectoryDeviceSource {
    async fn list_devices(&self) -> Result<Vec<DeviceHandle>, SourceError> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            SourceError::Unavailable(format!("{}: {}", self.root.display(), e))
        })?;

        let mut devices = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                devices.push(DeviceHandle::new(
                    entry.file_name().to_string_lossy().into_owned(),
                ));
            }
        }
        devices.sort();
        Ok(devices)
    }

    async fn read_export(&self, device: &DeviceHandle) -> Result<String, SourceError> {
        let path = self.root.join(&device.serial).join(&self.file_name);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::NotFound(device.serial.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("device directory {}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let output = "List of devices attached\n\
                      R58M123ABC\tdevice\n\
                      emulator-5554\toffline\n\
                      0123456789\tunauthorized\n\
                      R58M999XYZ\tdevice\n\n";
        assert_eq!(
            parse_device_list(output),
            vec![DeviceHandle::new("R58M123ABC"), DeviceHandle::new("R58M999XYZ")]
        );
        assert!(parse_device_list("").is_empty());
    }

    #[tokio::test]
    async fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("tablet-b")).unwrap();
        std::fs::create_dir(dir.path().join("tablet-a")).unwrap();
        std::fs::write(dir.path().join("stray.txt"), "not a device").unwrap();
        std::fs::write(
            dir.path().join("tablet-a").join("RadioScout.json"),
            r#"{"teams":{}}"#,
        )
        .unwrap();

        let source = DirectoryDeviceSource::for_export_path(dir.path(), DEFAULT_EXPORT_PATH);
        let devices = source.list_devices().await.unwrap();
        assert_eq!(
            devices,
            vec![DeviceHandle::new("tablet-a"), DeviceHandle::new("tablet-b")]
        );

        assert_eq!(
            source.read_export(&devices[0]).await.unwrap(),
            r#"{"teams":{}}"#
        );
        assert!(matches!(
            source.read_export(&devices[1]).await,
            Err(SourceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_directory_source_missing_root() {
        let source = DirectoryDeviceSource::new("/nonexistent/scout-relay", "RadioScout.json");
        assert!(matches!(
            source.list_devices().await,
            Err(SourceError::Unavailable(_))
        ));
    }
}
