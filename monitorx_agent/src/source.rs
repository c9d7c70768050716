//! Raw host readings. Everything the collectors know about the OS comes through
//! [`HostSource`], so the sampling pipeline can be driven by synthetic readings in tests.

use std::sync::{Mutex, MutexGuard};

#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use std::path::Path;

use sysinfo::{
    Components, CpuRefreshKind, Disks, MemoryRefreshKind, Networks, ProcessRefreshKind,
    ProcessesToUpdate, RefreshKind, System,
};

use crate::error::PlatformQueryError;

/// Cumulative tick breakdown for one logical core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CoreTimes {
    pub fn total(&self) -> u64 {
        self.user
            .saturating_add(self.nice)
            .saturating_add(self.system)
            .saturating_add(self.idle)
            .saturating_add(self.iowait)
            .saturating_add(self.irq)
            .saturating_add(self.softirq)
            .saturating_add(self.steal)
    }

    pub fn idle_total(&self) -> u64 {
        self.idle.saturating_add(self.iowait)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuInfo {
    pub model: String,
    /// Highest clock the cores can reach, in MHz. 0 when unknown.
    pub max_frequency_mhz: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryReading {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeReading {
    pub filesystem_id: String,
    pub mount_point: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Bytes read/written since boot, summed over all disks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskIoTotals {
    pub read_bytes: u64,
    pub written_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceReading {
    pub name: String,
    pub is_up: bool,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeState {
    Charging,
    Discharging,
    Full,
    NotCharging,
    Unknown,
}

impl ChargeState {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "charging" => ChargeState::Charging,
            "discharging" => ChargeState::Discharging,
            "full" => ChargeState::Full,
            "not charging" => ChargeState::NotCharging,
            _ => ChargeState::Unknown,
        }
    }
}

/// Result of the primary battery query: charge and charging state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryReading {
    pub percentage: u8,
    pub state: ChargeState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawProcess {
    pub pid: u32,
    pub name: String,
    pub cpu_usage: f32,
    pub rss_bytes: u64,
}

/// External program whose output carries the battery percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryCommand {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

/// OS access used by the collectors and the process listing. Methods may block;
/// callers run them on the blocking pool.
pub trait HostSource: Send + Sync + 'static {
    fn cpu_times(&self) -> Result<Vec<CoreTimes>, PlatformQueryError>;
    fn cpu_info(&self) -> Result<CpuInfo, PlatformQueryError>;
    /// Best sensor reading for the CPU package, if the OS exposes one.
    fn cpu_temperature(&self) -> Option<f32>;
    fn memory(&self) -> Result<MemoryReading, PlatformQueryError>;
    fn volumes(&self) -> Result<Vec<VolumeReading>, PlatformQueryError>;
    fn disk_io_totals(&self) -> Result<DiskIoTotals, PlatformQueryError>;
    fn interfaces(&self) -> Result<Vec<InterfaceReading>, PlatformQueryError>;
    fn battery_primary(&self) -> Result<BatteryReading, PlatformQueryError>;
    /// Program to run for the percentage-only fallback. The collector runs it
    /// itself so a hung child is killed when the collector times out.
    fn battery_command(&self) -> Option<BatteryCommand> {
        None
    }
    /// Raw output of a percentage-only query answered in-process; consulted only
    /// when there is no [`battery_command`](Self::battery_command).
    fn battery_secondary(&self) -> Result<String, PlatformQueryError> {
        Err(PlatformQueryError::Unsupported("battery percentage query"))
    }
    fn process_count(&self) -> Result<usize, PlatformQueryError>;
    fn processes(&self) -> Result<Vec<RawProcess>, PlatformQueryError>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Production source backed by persistent sysinfo handles.
pub struct SysinfoSource {
    sys: Mutex<System>,
    disks: Mutex<Disks>,
    networks: Mutex<Networks>,
    components: Mutex<Components>,
    // Synthesized cumulative ticks where the OS has no tick counters we can read
    #[cfg(not(target_os = "linux"))]
    tick_accum: Mutex<Vec<CoreTimes>>,
}

impl SysinfoSource {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        let mut sys = System::new_with_specifics(refresh_kind);
        sys.refresh_cpu_all();

        Self {
            sys: Mutex::new(sys),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            components: Mutex::new(Components::new_with_refreshed_list()),
            #[cfg(not(target_os = "linux"))]
            tick_accum: Mutex::new(Vec::new()),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSource for SysinfoSource {
    #[cfg(target_os = "linux")]
    fn cpu_times(&self) -> Result<Vec<CoreTimes>, PlatformQueryError> {
        let s = fs::read_to_string("/proc/stat")
            .map_err(|e| PlatformQueryError::io("/proc/stat", e))?;
        parse_proc_stat(&s)
    }

    // sysinfo only exposes a usage percentage here; accumulate it into per-mille
    // busy/idle ticks so the delta math stays the same on every platform.
    #[cfg(not(target_os = "linux"))]
    fn cpu_times(&self) -> Result<Vec<CoreTimes>, PlatformQueryError> {
        let usages: Vec<f32> = {
            let mut sys = lock(&self.sys);
            sys.refresh_cpu_usage();
            sys.cpus().iter().map(|c| c.cpu_usage()).collect()
        };
        if usages.is_empty() {
            return Err(PlatformQueryError::NotFound("cpu".into()));
        }
        let mut acc = lock(&self.tick_accum);
        acc.resize(usages.len(), CoreTimes::default());
        for (t, u) in acc.iter_mut().zip(usages) {
            let busy = (u.clamp(0.0, 100.0) * 10.0).round() as u64;
            t.user = t.user.saturating_add(busy);
            t.idle = t.idle.saturating_add(1000 - busy);
        }
        Ok(acc.clone())
    }

    fn cpu_info(&self) -> Result<CpuInfo, PlatformQueryError> {
        let mut sys = lock(&self.sys);
        sys.refresh_cpu_frequency();
        let cpu = sys
            .cpus()
            .first()
            .ok_or_else(|| PlatformQueryError::NotFound("cpu".into()))?;
        // sysinfo only knows the current clock; the highest one seen is the fallback.
        let current_max = sys.cpus().iter().map(|c| c.frequency()).max().unwrap_or(0);
        #[cfg(target_os = "linux")]
        let max_frequency_mhz =
            read_max_frequency_mhz(Path::new("/sys/devices/system/cpu")).unwrap_or(current_max);
        #[cfg(not(target_os = "linux"))]
        let max_frequency_mhz = current_max;
        Ok(CpuInfo {
            model: cpu.brand().trim().to_string(),
            max_frequency_mhz,
        })
    }

    fn cpu_temperature(&self) -> Option<f32> {
        let mut components = lock(&self.components);
        components.refresh(false);
        components
            .iter()
            .filter(|c| {
                let l = c.label().to_ascii_lowercase();
                l.contains("cpu") || l.contains("package") || l.contains("tctl") || l.contains("tdie")
            })
            .filter_map(|c| c.temperature())
            .filter(|t| t.is_finite())
            .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }

    fn memory(&self) -> Result<MemoryReading, PlatformQueryError> {
        let mut sys = lock(&self.sys);
        sys.refresh_memory();
        let total_bytes = sys.total_memory();
        if total_bytes == 0 {
            return Err(PlatformQueryError::NotFound("memory totals".into()));
        }
        Ok(MemoryReading {
            total_bytes,
            free_bytes: sys.available_memory().min(total_bytes),
        })
    }

    fn volumes(&self) -> Result<Vec<VolumeReading>, PlatformQueryError> {
        let mut disks = lock(&self.disks);
        disks.refresh(true);
        Ok(disks
            .iter()
            // pseudo filesystems report no capacity
            .filter(|d| d.total_space() > 0)
            .map(|d| VolumeReading {
                filesystem_id: d.name().to_string_lossy().into_owned(),
                mount_point: d.mount_point().to_string_lossy().into_owned(),
                total_bytes: d.total_space(),
                available_bytes: d.available_space(),
            })
            .collect())
    }

    fn disk_io_totals(&self) -> Result<DiskIoTotals, PlatformQueryError> {
        let mut disks = lock(&self.disks);
        disks.refresh(true);
        if disks.list().is_empty() {
            return Err(PlatformQueryError::NotFound("disk i/o counters".into()));
        }
        Ok(disks.iter().fold(DiskIoTotals::default(), |acc, d| {
            let u = d.usage();
            DiskIoTotals {
                read_bytes: acc.read_bytes.saturating_add(u.total_read_bytes),
                written_bytes: acc.written_bytes.saturating_add(u.total_written_bytes),
            }
        }))
    }

    fn interfaces(&self) -> Result<Vec<InterfaceReading>, PlatformQueryError> {
        let mut nets = lock(&self.networks);
        nets.refresh(true);
        let mut list: Vec<InterfaceReading> = nets
            .iter()
            .map(|(name, data)| InterfaceReading {
                name: name.to_string(),
                is_up: interface_is_up(name, data.total_received()),
                rx_bytes: data.total_received(),
                tx_bytes: data.total_transmitted(),
            })
            .collect();
        // stable order; primary_interface skips virtual names
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    #[cfg(target_os = "linux")]
    fn battery_primary(&self) -> Result<BatteryReading, PlatformQueryError> {
        read_sysfs_battery(Path::new("/sys/class/power_supply"))
    }

    #[cfg(not(target_os = "linux"))]
    fn battery_primary(&self) -> Result<BatteryReading, PlatformQueryError> {
        Err(PlatformQueryError::Unsupported("battery state query"))
    }

    fn battery_command(&self) -> Option<BatteryCommand> {
        Some(if cfg!(target_os = "windows") {
            BatteryCommand {
                program: "wmic",
                args: &["path", "Win32_Battery", "get", "EstimatedChargeRemaining"],
            }
        } else if cfg!(target_os = "macos") {
            BatteryCommand {
                program: "pmset",
                args: &["-g", "batt"],
            }
        } else {
            BatteryCommand {
                program: "upower",
                args: &["-i", "/org/freedesktop/UPower/devices/DisplayDevice"],
            }
        })
    }

    fn process_count(&self) -> Result<usize, PlatformQueryError> {
        let mut sys = lock(&self.sys);
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );
        Ok(sys.processes().len())
    }

    fn processes(&self) -> Result<Vec<RawProcess>, PlatformQueryError> {
        let mut sys = lock(&self.sys);
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        Ok(sys
            .processes()
            .values()
            .map(|p| RawProcess {
                pid: p.pid().as_u32(),
                name: p.name().to_string_lossy().into_owned(),
                cpu_usage: p.cpu_usage(),
                rss_bytes: p.memory(),
            })
            .collect())
    }
}

#[cfg(target_os = "linux")]
fn interface_is_up(name: &str, _rx_total: u64) -> bool {
    fs::read_to_string(format!("/sys/class/net/{name}/operstate"))
        .map(|s| s.trim() == "up")
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn interface_is_up(_name: &str, rx_total: u64) -> bool {
    rx_total > 0
}

/// Per-core lines (`cpu0`, `cpu1`, ...) of `/proc/stat`; the aggregate `cpu` line is skipped.
pub fn parse_proc_stat(s: &str) -> Result<Vec<CoreTimes>, PlatformQueryError> {
    let mut cores = Vec::new();
    for line in s.lines() {
        let mut it = line.split_whitespace();
        let Some(label) = it.next() else { continue };
        let Some(idx) = label.strip_prefix("cpu") else {
            continue;
        };
        if idx.is_empty() || !idx.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let vals: Vec<u64> = it.take(8).map(|t| t.parse().unwrap_or(0)).collect();
        if vals.len() < 4 {
            return Err(PlatformQueryError::parse("/proc/stat", format!("short line: {line}")));
        }
        let get = |i: usize| vals.get(i).copied().unwrap_or(0);
        cores.push(CoreTimes {
            user: get(0),
            nice: get(1),
            system: get(2),
            idle: get(3),
            iowait: get(4),
            irq: get(5),
            softirq: get(6),
            steal: get(7),
        });
    }
    if cores.is_empty() {
        return Err(PlatformQueryError::parse("/proc/stat", "no per-cpu lines"));
    }
    Ok(cores)
}

/// Highest `cpufreq/cpuinfo_max_freq` (kHz) across the `cpuN` directories, in MHz.
#[cfg(target_os = "linux")]
pub fn read_max_frequency_mhz(root: &Path) -> Option<u64> {
    fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.strip_prefix("cpu")
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        })
        .filter_map(|e| fs::read_to_string(e.path().join("cpufreq/cpuinfo_max_freq")).ok())
        .filter_map(|raw| raw.trim().parse::<u64>().ok())
        .max()
        .map(|khz| khz / 1000)
        .filter(|&mhz| mhz > 0)
}

/// First `type == Battery` entry under a power_supply class directory.
#[cfg(target_os = "linux")]
pub fn read_sysfs_battery(root: &Path) -> Result<BatteryReading, PlatformQueryError> {
    let entries = fs::read_dir(root).map_err(|e| PlatformQueryError::io(root.display().to_string(), e))?;
    let mut dirs: Vec<_> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    dirs.sort();
    for dir in dirs {
        let kind = fs::read_to_string(dir.join("type")).unwrap_or_default();
        if kind.trim() != "Battery" {
            continue;
        }
        let cap_path = dir.join("capacity");
        let raw = fs::read_to_string(&cap_path)
            .map_err(|e| PlatformQueryError::io(cap_path.display().to_string(), e))?;
        let pct: u32 = raw
            .trim()
            .parse()
            .map_err(|_| PlatformQueryError::parse(cap_path.display().to_string(), raw.trim()))?;
        let state = fs::read_to_string(dir.join("status"))
            .map(|s| ChargeState::parse(&s))
            .unwrap_or(ChargeState::Unknown);
        return Ok(BatteryReading {
            percentage: pct.min(100) as u8,
            state,
        });
    }
    Err(PlatformQueryError::NotFound("battery".into()))
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted readings for unit tests. Queues hand out their front element and
    //! repeat the last one once drained; an empty queue or `None` is a failed query.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct FakeState {
        pub cpu: VecDeque<Vec<CoreTimes>>,
        pub cpu_info: Option<CpuInfo>,
        pub temperature: Option<f32>,
        pub memory: Option<MemoryReading>,
        pub volumes: Option<Vec<VolumeReading>>,
        pub disk_io: VecDeque<DiskIoTotals>,
        pub interfaces: VecDeque<Vec<InterfaceReading>>,
        pub battery_primary: Option<BatteryReading>,
        pub battery_secondary: Option<String>,
        pub battery_command: Option<BatteryCommand>,
        /// Blocks the primary battery query this long before failing.
        pub battery_stall: Option<std::time::Duration>,
        pub process_count: Option<usize>,
        pub processes: Option<Vec<RawProcess>>,
    }

    #[derive(Default)]
    pub struct FakeSource {
        pub state: Mutex<FakeState>,
        /// Primary battery queries currently blocked in `battery_stall`, and the peak.
        pub stalled_now: AtomicUsize,
        pub stalled_peak: AtomicUsize,
    }

    impl FakeSource {
        pub fn with(f: impl FnOnce(&mut FakeState)) -> Self {
            let mut st = FakeState::default();
            f(&mut st);
            Self {
                state: Mutex::new(st),
                ..Default::default()
            }
        }

        pub fn edit(&self, f: impl FnOnce(&mut FakeState)) {
            f(&mut lock(&self.state));
        }
    }

    fn next<T: Clone>(q: &mut VecDeque<T>, what: &str) -> Result<T, PlatformQueryError> {
        if q.len() > 1 {
            Ok(q.pop_front().expect("len checked"))
        } else {
            q.front()
                .cloned()
                .ok_or_else(|| PlatformQueryError::NotFound(what.into()))
        }
    }

    fn missing(what: &str) -> PlatformQueryError {
        PlatformQueryError::NotFound(what.into())
    }

    impl HostSource for FakeSource {
        fn cpu_times(&self) -> Result<Vec<CoreTimes>, PlatformQueryError> {
            next(&mut lock(&self.state).cpu, "cpu times")
        }
        fn cpu_info(&self) -> Result<CpuInfo, PlatformQueryError> {
            lock(&self.state).cpu_info.clone().ok_or_else(|| missing("cpu info"))
        }
        fn cpu_temperature(&self) -> Option<f32> {
            lock(&self.state).temperature
        }
        fn memory(&self) -> Result<MemoryReading, PlatformQueryError> {
            lock(&self.state).memory.ok_or_else(|| missing("memory"))
        }
        fn volumes(&self) -> Result<Vec<VolumeReading>, PlatformQueryError> {
            lock(&self.state).volumes.clone().ok_or_else(|| missing("volumes"))
        }
        fn disk_io_totals(&self) -> Result<DiskIoTotals, PlatformQueryError> {
            next(&mut lock(&self.state).disk_io, "disk io")
        }
        fn interfaces(&self) -> Result<Vec<InterfaceReading>, PlatformQueryError> {
            next(&mut lock(&self.state).interfaces, "interfaces")
        }
        fn battery_primary(&self) -> Result<BatteryReading, PlatformQueryError> {
            let stall = lock(&self.state).battery_stall;
            if let Some(d) = stall {
                let now = self.stalled_now.fetch_add(1, Ordering::SeqCst) + 1;
                self.stalled_peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(d);
                self.stalled_now.fetch_sub(1, Ordering::SeqCst);
            }
            lock(&self.state).battery_primary.ok_or_else(|| missing("battery"))
        }
        fn battery_command(&self) -> Option<BatteryCommand> {
            lock(&self.state).battery_command
        }
        fn battery_secondary(&self) -> Result<String, PlatformQueryError> {
            lock(&self.state)
                .battery_secondary
                .clone()
                .ok_or_else(|| missing("battery percentage"))
        }
        fn process_count(&self) -> Result<usize, PlatformQueryError> {
            lock(&self.state).process_count.ok_or_else(|| missing("processes"))
        }
        fn processes(&self) -> Result<Vec<RawProcess>, PlatformQueryError> {
            lock(&self.state)
                .processes
                .clone()
                .ok_or_else(|| missing("process list"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_STAT: &str = "\
cpu  200 0 100 700 0 0 0 0 0 0
cpu0 100 0 50 300 20 0 0 0 0 0
cpu1 100 0 50 400 0 0 0 0 0 0
intr 12345
ctxt 999
";

    #[test]
    fn parses_per_core_lines_only() {
        let cores = parse_proc_stat(PROC_STAT).unwrap();
        assert_eq!(cores.len(), 2);
        assert_eq!(cores[0].total(), 470);
        assert_eq!(cores[0].idle_total(), 320);
        assert_eq!(cores[1].idle, 400);
    }

    #[test]
    fn proc_stat_without_cores_is_an_error() {
        assert!(parse_proc_stat("cpu  1 2 3 4\nintr 5\n").is_err());
        assert!(parse_proc_stat("cpu0 1 2\n").is_err());
    }

    #[test]
    fn charge_state_parsing() {
        assert_eq!(ChargeState::parse("Charging\n"), ChargeState::Charging);
        assert_eq!(ChargeState::parse("Discharging"), ChargeState::Discharging);
        assert_eq!(ChargeState::parse("Full"), ChargeState::Full);
        assert_eq!(ChargeState::parse("Not charging"), ChargeState::NotCharging);
        assert_eq!(ChargeState::parse("???"), ChargeState::Unknown);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn reads_battery_from_power_supply_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ac = dir.path().join("AC");
        std::fs::create_dir(&ac).unwrap();
        std::fs::write(ac.join("type"), "Mains\n").unwrap();
        let bat = dir.path().join("BAT0");
        std::fs::create_dir(&bat).unwrap();
        std::fs::write(bat.join("type"), "Battery\n").unwrap();
        std::fs::write(bat.join("capacity"), "87\n").unwrap();
        std::fs::write(bat.join("status"), "Discharging\n").unwrap();

        let r = read_sysfs_battery(dir.path()).unwrap();
        assert_eq!(r.percentage, 87);
        assert_eq!(r.state, ChargeState::Discharging);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn max_frequency_is_highest_core_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        for (cpu, khz) in [("cpu0", "3400000\n"), ("cpu1", "4700000\n")] {
            let freq = dir.path().join(cpu).join("cpufreq");
            std::fs::create_dir_all(&freq).unwrap();
            std::fs::write(freq.join("cpuinfo_max_freq"), khz).unwrap();
        }
        // not a core directory
        let other = dir.path().join("cpufreq");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(other.join("cpuinfo_max_freq"), "9900000\n").unwrap();

        assert_eq!(read_max_frequency_mhz(dir.path()), Some(4700));
        assert_eq!(read_max_frequency_mhz(&dir.path().join("missing")), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn no_battery_entry_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_sysfs_battery(dir.path()),
            Err(PlatformQueryError::NotFound(_))
        ));
    }
}
