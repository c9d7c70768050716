//! Shared fixtures for integration tests: a scripted host and a server spawner.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Mutex;

use monitorx_agent::error::PlatformQueryError;
use monitorx_agent::http::build_router;
use monitorx_agent::source::{
    BatteryReading, CoreTimes, CpuInfo, DiskIoTotals, HostSource, InterfaceReading,
    MemoryReading, RawProcess, VolumeReading,
};
use monitorx_agent::state::AppState;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Deterministic host: a single core whose busy share per tick follows `cpu_steps`
/// (in percent), one volume, one interface, no battery.
pub struct ScriptedHost {
    cpu: Mutex<VecDeque<CoreTimes>>,
    last: Mutex<CoreTimes>,
}

impl ScriptedHost {
    pub fn with_cpu_steps(steps: &[u64]) -> Self {
        let mut acc = CoreTimes::default();
        let mut q = VecDeque::new();
        for &busy in steps {
            acc.user += busy;
            acc.idle += 100 - busy;
            q.push_back(acc);
        }
        Self {
            cpu: Mutex::new(q),
            last: Mutex::new(acc),
        }
    }
}

impl HostSource for ScriptedHost {
    fn cpu_times(&self) -> Result<Vec<CoreTimes>, PlatformQueryError> {
        let next = self.cpu.lock().unwrap().pop_front();
        let t = match next {
            Some(t) => t,
            None => *self.last.lock().unwrap(),
        };
        Ok(vec![t])
    }
    fn cpu_info(&self) -> Result<CpuInfo, PlatformQueryError> {
        Ok(CpuInfo {
            model: "Test CPU @ 2.40GHz".into(),
            max_frequency_mhz: 2400,
        })
    }
    fn cpu_temperature(&self) -> Option<f32> {
        Some(42.0)
    }
    fn memory(&self) -> Result<MemoryReading, PlatformQueryError> {
        Ok(MemoryReading {
            total_bytes: 16 << 30,
            free_bytes: 4 << 30,
        })
    }
    fn volumes(&self) -> Result<Vec<VolumeReading>, PlatformQueryError> {
        Ok(vec![VolumeReading {
            filesystem_id: "/dev/test0".into(),
            mount_point: "/".into(),
            total_bytes: 1000,
            available_bytes: 250,
        }])
    }
    fn disk_io_totals(&self) -> Result<DiskIoTotals, PlatformQueryError> {
        Ok(DiskIoTotals::default())
    }
    fn interfaces(&self) -> Result<Vec<InterfaceReading>, PlatformQueryError> {
        Ok(vec![InterfaceReading {
            name: "eth0".into(),
            is_up: true,
            rx_bytes: 0,
            tx_bytes: 0,
        }])
    }
    fn battery_primary(&self) -> Result<BatteryReading, PlatformQueryError> {
        Err(PlatformQueryError::NotFound("battery".into()))
    }
    fn battery_secondary(&self) -> Result<String, PlatformQueryError> {
        Err(PlatformQueryError::NotFound("battery".into()))
    }
    fn process_count(&self) -> Result<usize, PlatformQueryError> {
        Ok(3)
    }
    fn processes(&self) -> Result<Vec<RawProcess>, PlatformQueryError> {
        Ok(vec![
            RawProcess {
                pid: 1,
                name: "init".into(),
                cpu_usage: 0.5,
                rss_bytes: 8 << 20,
            },
            RawProcess {
                pid: 200,
                name: "db".into(),
                cpu_usage: 12.0,
                rss_bytes: 512 << 20,
            },
        ])
    }
}

pub async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, build_router(state)).await;
    });
    addr
}

/// Minimal HTTP/1.1 client: returns status and JSON body.
pub async fn request(addr: SocketAddr, method: &str, path: &str) -> (u16, serde_json::Value) {
    let mut s = TcpStream::connect(addr).await.unwrap();
    let req = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
    );
    s.write_all(req.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    s.read_to_end(&mut buf).await.unwrap();
    let text = String::from_utf8_lossy(&buf);
    let (head, body) = text.split_once("\r\n\r\n").unwrap();
    let status = head.split_whitespace().nth(1).unwrap().parse().unwrap();
    (status, serde_json::from_str(body).unwrap())
}
