//! Live host facts consulted during validation.
//!
//! Nothing here is cached: every call re-reads the host, since memory and
//! device availability can change between requests.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use thiserror::Error;

/// Failure to read a host fact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("{0} is unavailable on this host")]
    Unavailable(&'static str),
}

/// Source of runtime host facts.
///
/// Implementations must answer quickly; they are called synchronously while
/// a `set` holds the writer lock.
pub trait HostIntrospector: Send + Sync + fmt::Debug {
    fn total_memory_bytes(&self) -> Result<u64, HostError>;
    fn available_memory_bytes(&self) -> Result<u64, HostError>;
    fn gpu_device_count(&self) -> Result<u32, HostError>;
    /// Ports with a listening TCP socket.
    fn bound_ports(&self) -> Result<BTreeSet<u16>, HostError>;
}

/// Reads facts from procfs/sysfs.
#[derive(Debug, Clone)]
pub struct SystemHost {
    root: PathBuf,
    gpu_count_override: Option<u32>,
    total_memory_override: Option<u64>,
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemHost {
    pub fn new() -> Self {
        Self::with_root("/")
    }

    /// Resolve `/proc` and `/sys` under `root` instead of `/`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            gpu_count_override: None,
            total_memory_override: None,
        }
    }

    pub fn gpu_count_override(mut self, count: Option<u32>) -> Self {
        self.gpu_count_override = count;
        self
    }

    pub fn total_memory_override(mut self, bytes: Option<u64>) -> Self {
        self.total_memory_override = bytes;
        self
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn meminfo_field(&self, field: &str) -> Result<u64, HostError> {
        let path = self.path("proc/meminfo");
        let content = read(&path)?;
        parse_meminfo(&content, field).ok_or_else(|| HostError::Parse {
            path: path.display().to_string(),
            reason: format!("missing {field}"),
        })
    }

    /// Memory limit of the enclosing cgroup, if one is set.
    fn cgroup_limit(&self) -> Option<u64> {
        ["sys/fs/cgroup/memory.max", "sys/fs/cgroup/memory/memory.limit_in_bytes"]
            .iter()
            .find_map(|relative| {
                let content = fs::read_to_string(self.path(relative)).ok()?;
                content.trim().parse::<u64>().ok()
            })
    }
}

impl HostIntrospector for SystemHost {
    fn total_memory_bytes(&self) -> Result<u64, HostError> {
        if let Some(bytes) = self.total_memory_override {
            return Ok(bytes);
        }
        let physical = self.meminfo_field("MemTotal")?;
        Ok(self.cgroup_limit().map_or(physical, |limit| limit.min(physical)))
    }

    fn available_memory_bytes(&self) -> Result<u64, HostError> {
        let available = self.meminfo_field("MemAvailable")?;
        Ok(self.cgroup_limit().map_or(available, |limit| limit.min(available)))
    }

    fn gpu_device_count(&self) -> Result<u32, HostError> {
        if let Some(count) = self.gpu_count_override {
            return Ok(count);
        }
        let path = self.path("proc/driver/nvidia/gpus");
        match fs::read_dir(&path) {
            Ok(entries) => {
                let count = entries.filter_map(Result::ok).count();
                u32::try_from(count).map_err(|e| HostError::Parse {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
            // No driver, no devices.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(HostError::Read {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn bound_ports(&self) -> Result<BTreeSet<u16>, HostError> {
        let mut ports = parse_listening_ports(&read(&self.path("proc/net/tcp"))?);
        match fs::read_to_string(self.path("proc/net/tcp6")) {
            Ok(content) => ports.extend(parse_listening_ports(&content)),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(HostError::Read {
                    path: self.path("proc/net/tcp6").display().to_string(),
                    reason: e.to_string(),
                })
            }
        }
        Ok(ports)
    }
}

fn read(path: &Path) -> Result<String, HostError> {
    fs::read_to_string(path).map_err(|e| HostError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Value of a `/proc/meminfo` field in bytes.
fn parse_meminfo(content: &str, field: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix(field)?.strip_prefix(':')?;
        let mut parts = rest.split_whitespace();
        let amount: u64 = parts.next()?.parse().ok()?;
        match parts.next() {
            Some("kB") => amount.checked_mul(1024),
            None => Some(amount),
            Some(_) => None,
        }
    })
}

/// Local ports of sockets in LISTEN state from a `/proc/net/tcp{,6}` table.
fn parse_listening_ports(content: &str) -> BTreeSet<u16> {
    const TCP_LISTEN: &str = "0A";

    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let local = fields.nth(1)?;
            let state = fields.nth(1)?;
            if state != TCP_LISTEN {
                return None;
            }
            let (_, port) = local.rsplit_once(':')?;
            u16::from_str_radix(port, 16).ok()
        })
        .collect()
}

/// Facts reported by [`StaticHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    pub total_memory_bytes: u64,
    pub available_memory_bytes: u64,
    pub gpu_device_count: u32,
    pub bound_ports: BTreeSet<u16>,
    /// When set every call fails with [`HostError::Unavailable`].
    pub unavailable: bool,
}

impl Default for HostFacts {
    fn default() -> Self {
        Self {
            total_memory_bytes: 16 << 30,
            available_memory_bytes: 12 << 30,
            gpu_device_count: 1,
            bound_ports: BTreeSet::new(),
            unavailable: false,
        }
    }
}

/// Host with fixed, runtime-adjustable facts. Used when embedding the
/// service without a real host to inspect, and in tests.
#[derive(Debug, Default)]
pub struct StaticHost {
    facts: RwLock<HostFacts>,
}

impl StaticHost {
    pub fn new(facts: HostFacts) -> Self {
        Self {
            facts: RwLock::new(facts),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut HostFacts)) {
        let mut facts = self.facts.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut facts);
    }

    fn read<T>(&self, what: &'static str, f: impl FnOnce(&HostFacts) -> T) -> Result<T, HostError> {
        let facts = self.facts.read().unwrap_or_else(PoisonError::into_inner);
        if facts.unavailable {
            return Err(HostError::Unavailable(what));
        }
        Ok(f(&facts))
    }
}

impl HostIntrospector for StaticHost {
    fn total_memory_bytes(&self) -> Result<u64, HostError> {
        self.read("total memory", |f| f.total_memory_bytes)
    }

    fn available_memory_bytes(&self) -> Result<u64, HostError> {
        self.read("available memory", |f| f.available_memory_bytes)
    }

    fn gpu_device_count(&self) -> Result<u32, HostError> {
        self.read("GPU device count", |f| f.gpu_device_count)
    }

    fn bound_ports(&self) -> Result<BTreeSet<u16>, HostError> {
        self.read("bound ports", |f| f.bound_ports.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MEMINFO: &str = "MemTotal:       16318540 kB\nMemFree:         1000000 kB\nMemAvailable:    8000000 kB\n";

    const TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n   \
   0: 00000000:4C4A 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 1 1 0 100 0 0 10 0\n   \
   1: 0100007F:2383 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 2 1 0 100 0 0 10 0\n   \
   2: 0100007F:9C40 0100007F:4C4A 01 00000000:00000000 00:00000000 00000000  1000        0 3 1 0 100 0 0 10 0\n";

    fn fixture_root() -> TempDir {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("proc/net")).unwrap();
        fs::write(root.path().join("proc/meminfo"), MEMINFO).unwrap();
        fs::write(root.path().join("proc/net/tcp"), TCP).unwrap();
        root
    }

    #[test]
    fn test_parse_meminfo() {
        assert_eq!(parse_meminfo(MEMINFO, "MemTotal"), Some(16318540 * 1024));
        assert_eq!(parse_meminfo(MEMINFO, "MemAvailable"), Some(8000000 * 1024));
        assert_eq!(parse_meminfo(MEMINFO, "SwapTotal"), None);
        // Prefix of another field name does not match.
        assert_eq!(parse_meminfo(MEMINFO, "Mem"), None);
    }

    #[test]
    fn test_parse_listening_ports() {
        let ports = parse_listening_ports(TCP);
        assert_eq!(ports, BTreeSet::from([19530, 9091]));
    }

    #[test]
    fn test_system_host_reads_fixture() {
        let root = fixture_root();
        let host = SystemHost::with_root(root.path());

        assert_eq!(host.total_memory_bytes().unwrap(), 16318540 * 1024);
        assert_eq!(host.available_memory_bytes().unwrap(), 8000000 * 1024);
        assert_eq!(host.gpu_device_count().unwrap(), 0);
        assert!(host.bound_ports().unwrap().contains(&19530));
    }

    #[test]
    fn test_system_host_respects_cgroup_limit() {
        let root = fixture_root();
        let cgroup = root.path().join("sys/fs/cgroup");
        fs::create_dir_all(&cgroup).unwrap();
        fs::write(cgroup.join("memory.max"), "2147483648\n").unwrap();

        let host = SystemHost::with_root(root.path());
        assert_eq!(host.total_memory_bytes().unwrap(), 2 << 30);

        // "max" means unlimited.
        fs::write(cgroup.join("memory.max"), "max\n").unwrap();
        assert_eq!(host.total_memory_bytes().unwrap(), 16318540 * 1024);
    }

    #[test]
    fn test_system_host_counts_gpus() {
        let root = fixture_root();
        for bus in ["0000:01:00.0", "0000:02:00.0"] {
            fs::create_dir_all(root.path().join("proc/driver/nvidia/gpus").join(bus)).unwrap();
        }

        let host = SystemHost::with_root(root.path());
        assert_eq!(host.gpu_device_count().unwrap(), 2);
        assert_eq!(host.clone().gpu_count_override(Some(8)).gpu_device_count().unwrap(), 8);
    }

    #[test]
    fn test_missing_meminfo_is_an_error() {
        let root = TempDir::new().unwrap();
        let host = SystemHost::with_root(root.path().join("missing"));
        assert!(matches!(host.total_memory_bytes(), Err(HostError::Read { .. })));
        assert_eq!(host.total_memory_override(Some(42)).total_memory_bytes().unwrap(), 42);
    }

    #[test]
    fn test_static_host_can_fail() {
        let host = StaticHost::new(HostFacts::default());
        assert_eq!(host.gpu_device_count().unwrap(), 1);

        host.update(|f| f.unavailable = true);
        assert_eq!(
            host.gpu_device_count().unwrap_err(),
            HostError::Unavailable("GPU device count")
        );
    }
}
