use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::dist::{Communicator, SingleProcess, TcpGroup};
use crate::error::{Result, TrainError};

const DEFAULT_MASTER_ADDR: &str = "127.0.0.1";
const DEFAULT_MASTER_PORT: u16 = 29500;
const GROUP_INIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Set while a context is alive in this process; the group is formed once.
static GROUP_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Rank identity handed over by the launcher through the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankEnv {
    pub local_rank: usize,
    pub rank: usize,
    pub world_size: usize,
    pub master: SocketAddr,
}

impl RankEnv {
    /// Reads `LOCAL_RANK` (required), `RANK`, `WORLD_SIZE`, `MASTER_ADDR`
    /// and `MASTER_PORT`.
    pub fn from_env() -> Result<RankEnv> {
        RankEnv::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<RankEnv>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str, raw: String| -> Result<usize> {
            raw.trim()
                .parse()
                .map_err(|_| TrainError::Startup(format!("{key}={raw:?} is not a non-negative integer")))
        };

        let local_rank = match lookup("LOCAL_RANK") {
            Some(raw) => parse("LOCAL_RANK", raw)?,
            None => return Err(TrainError::Startup("LOCAL_RANK is not set".into())),
        };
        let rank = lookup("RANK").map(|r| parse("RANK", r)).transpose()?.unwrap_or(local_rank);
        let world_size = lookup("WORLD_SIZE")
            .map(|w| parse("WORLD_SIZE", w))
            .transpose()?
            .unwrap_or(1);
        if world_size == 0 || rank >= world_size {
            return Err(TrainError::Startup(format!(
                "rank {rank} does not fit in WORLD_SIZE={world_size}"
            )));
        }

        let addr_raw = lookup("MASTER_ADDR").unwrap_or_else(|| DEFAULT_MASTER_ADDR.to_string());
        let addr: IpAddr = addr_raw
            .trim()
            .parse()
            .map_err(|_| TrainError::Startup(format!("MASTER_ADDR={addr_raw:?} is not an IP address")))?;
        let port = match lookup("MASTER_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| TrainError::Startup(format!("MASTER_PORT={raw:?} is not a port")))?,
            None => DEFAULT_MASTER_PORT,
        };

        Ok(RankEnv {
            local_rank,
            rank,
            world_size,
            master: SocketAddr::new(addr, port),
        })
    }
}

/// Compute device a process is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Ordinal(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Ordinal(i) => write!(f, "device:{i}"),
        }
    }
}

/// The process's membership in the training group.
///
/// Created once with [`DistributedContext::setup`] before any collective and
/// released once with [`DistributedContext::teardown`], which consumes it.
pub struct DistributedContext {
    env: RankEnv,
    device: Device,
    comm: Arc<dyn Communicator>,
    torn_down: bool,
}

impl DistributedContext {
    /// Joins the group described by the process environment.
    pub fn setup() -> Result<DistributedContext> {
        DistributedContext::setup_with(RankEnv::from_env()?)
    }

    /// Joins the group described by `env`. A group of one needs no transport;
    /// larger groups meet over TCP at the master address.
    pub fn setup_with(env: RankEnv) -> Result<DistributedContext> {
        if GROUP_ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(TrainError::GroupInit(
                "process group already initialised in this process".into(),
            ));
        }

        let comm: Result<Arc<dyn Communicator>> = if env.world_size == 1 {
            Ok(Arc::new(SingleProcess))
        } else {
            TcpGroup::connect(env.rank, env.world_size, env.master, GROUP_INIT_TIMEOUT)
                .map(|g| Arc::new(g) as Arc<dyn Communicator>)
        };
        let comm = match comm {
            Ok(comm) => comm,
            Err(e) => {
                GROUP_ACTIVE.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let device = Device::Ordinal(env.local_rank);
        info!(
            rank = env.rank,
            local_rank = env.local_rank,
            world_size = env.world_size,
            %device,
            "process group ready"
        );
        Ok(DistributedContext {
            env,
            device,
            comm,
            torn_down: false,
        })
    }

    pub fn rank(&self) -> usize {
        self.env.rank
    }

    pub fn local_rank(&self) -> usize {
        self.env.local_rank
    }

    pub fn world_size(&self) -> usize {
        self.env.world_size
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn is_leader(&self) -> bool {
        self.comm.is_leader()
    }

    pub fn communicator(&self) -> Arc<dyn Communicator> {
        Arc::clone(&self.comm)
    }

    /// Releases the group. Runs on normal completion and after fatal errors
    /// alike, so it does not synchronise with the other ranks.
    pub fn teardown(mut self) -> Result<()> {
        self.torn_down = true;
        GROUP_ACTIVE.store(false, Ordering::SeqCst);
        info!(rank = self.env.rank, "process group destroyed");
        self.comm.shutdown()
    }
}

impl Drop for DistributedContext {
    fn drop(&mut self) {
        if !self.torn_down {
            warn!(rank = self.env.rank, "process group dropped without teardown");
            let _ = self.comm.shutdown();
            GROUP_ACTIVE.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_local_rank_is_a_startup_error() {
        let err = RankEnv::from_lookup(lookup(&[("WORLD_SIZE", "2")])).unwrap_err();
        assert!(matches!(err, TrainError::Startup(_)));
    }

    #[test]
    fn rank_defaults_to_local_rank() {
        let env = RankEnv::from_lookup(lookup(&[("LOCAL_RANK", "1"), ("WORLD_SIZE", "4")])).unwrap();
        assert_eq!(env.rank, 1);
        assert_eq!(env.world_size, 4);
        assert_eq!(env.master, "127.0.0.1:29500".parse().unwrap());
    }

    #[test]
    fn rank_outside_world_is_rejected() {
        let err = RankEnv::from_lookup(lookup(&[("LOCAL_RANK", "2"), ("WORLD_SIZE", "2")])).unwrap_err();
        assert!(matches!(err, TrainError::Startup(_)));
    }

    #[test]
    fn garbage_rank_is_rejected() {
        assert!(RankEnv::from_lookup(lookup(&[("LOCAL_RANK", "gpu0")])).is_err());
    }

    #[test]
    fn single_process_setup_binds_device_and_tears_down() {
        let env = RankEnv::from_lookup(lookup(&[("LOCAL_RANK", "0")])).unwrap();
        let ctx = DistributedContext::setup_with(env.clone()).unwrap();
        assert_eq!(ctx.device(), Device::Ordinal(0));
        assert!(ctx.is_leader());
        assert!(DistributedContext::setup_with(env.clone()).is_err());
        ctx.teardown().unwrap();

        // Released: a new group may form.
        DistributedContext::setup_with(env).unwrap().teardown().unwrap();
    }
}
