use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::dist::Communicator;
use crate::error::{Result, TrainError};

// ─── Wire protocol ──────────────────────────────────────────────────────────
//
// frame := tag:u32 | count:u64 | count × f64   (all little-endian)

const TAG_HELLO: u32 = 1;
const TAG_ALL_REDUCE: u32 = 2;
const TAG_BROADCAST: u32 = 3;
const TAG_ABORT: u32 = 4;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Largest payload accepted in one frame, in values (2 GiB).
const MAX_FRAME_VALUES: usize = 1 << 28;

fn write_frame(stream: &mut TcpStream, tag: u32, data: &[f64]) -> io::Result<()> {
    let mut buf = Vec::with_capacity(12 + data.len() * 8);
    buf.extend_from_slice(&tag.to_le_bytes());
    buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
    for v in data {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    stream.write_all(&buf)?;
    stream.flush()
}

fn read_frame(stream: &mut TcpStream) -> io::Result<(u32, Vec<f64>)> {
    let mut header = [0u8; 12];
    stream.read_exact(&mut header)?;
    let tag = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header[4..12]);
    let count = usize::try_from(u64::from_le_bytes(count_bytes))
        .ok()
        .filter(|&c| c <= MAX_FRAME_VALUES)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "frame exceeds the size limit"))?;

    let mut payload = vec![0u8; count * 8];
    stream.read_exact(&mut payload)?;
    let data = payload
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect();
    Ok((tag, data))
}

fn collective_err(op: &'static str) -> impl Fn(io::Error) -> TrainError {
    move |e| TrainError::Collective {
        op,
        reason: e.to_string(),
    }
}

fn expect_frame(
    op: &'static str,
    stream: &mut TcpStream,
    tag: u32,
    len: usize,
) -> Result<std::result::Result<Vec<f64>, String>> {
    let (got, data) = read_frame(stream).map_err(collective_err(op))?;
    if got == TAG_ABORT {
        return Ok(Err("aborted by the hub".into()));
    }
    if got != tag {
        return Ok(Err(format!("unexpected frame tag {got}, wanted {tag}")));
    }
    if data.len() != len {
        return Ok(Err(format!("received {} values, expected {len}", data.len())));
    }
    Ok(Ok(data))
}

#[derive(Debug)]
enum Role {
    /// Rank 0: holds one stream per other rank, index `r - 1` for rank `r`.
    Hub { peers: Mutex<Vec<TcpStream>> },
    Spoke { hub: Mutex<TcpStream> },
}

/// Star-topology group over TCP, rooted at rank 0.
///
/// Rank 0 listens on the master address, every other rank connects to it.
/// Reductions are summed on rank 0 in rank order and sent back, so each rank
/// receives exactly the same bits.
#[derive(Debug)]
pub struct TcpGroup {
    rank: usize,
    world_size: usize,
    role: Role,
}

impl TcpGroup {
    /// Forms the group. Non-zero ranks keep dialing the master until
    /// `timeout` elapses; rank 0 waits up to `timeout` for all of them.
    pub fn connect(
        rank: usize,
        world_size: usize,
        master: SocketAddr,
        timeout: Duration,
    ) -> Result<TcpGroup> {
        if world_size == 0 || rank >= world_size {
            return Err(TrainError::GroupInit(format!(
                "rank {rank} is not part of a group of {world_size}"
            )));
        }
        let deadline = Instant::now() + timeout;
        let role = if rank == 0 {
            Role::Hub {
                peers: Mutex::new(Self::accept_peers(world_size, master, deadline)?),
            }
        } else {
            Role::Spoke {
                hub: Mutex::new(Self::dial_hub(rank, master, deadline)?),
            }
        };
        info!(rank, world_size, %master, "tcp process group formed");
        Ok(TcpGroup {
            rank,
            world_size,
            role,
        })
    }

    fn accept_peers(world_size: usize, master: SocketAddr, deadline: Instant) -> Result<Vec<TcpStream>> {
        let init_err = |e: io::Error| TrainError::GroupInit(format!("listen on {master}: {e}"));
        let listener = TcpListener::bind(master).map_err(init_err)?;
        listener.set_nonblocking(true).map_err(init_err)?;

        let mut slots: Vec<Option<TcpStream>> = (1..world_size).map(|_| None).collect();
        let mut joined = 0;
        while joined < world_size - 1 {
            match listener.accept() {
                Ok((mut stream, addr)) => {
                    stream.set_nonblocking(false).map_err(init_err)?;
                    stream.set_nodelay(true).map_err(init_err)?;
                    let remaining = deadline.saturating_duration_since(Instant::now()).max(POLL_INTERVAL);
                    stream.set_read_timeout(Some(remaining)).map_err(init_err)?;
                    let (tag, data) = read_frame(&mut stream).map_err(init_err)?;
                    stream.set_read_timeout(None).map_err(init_err)?;
                    let peer = match (tag, data.as_slice()) {
                        (TAG_HELLO, [r]) => *r as usize,
                        _ => {
                            return Err(TrainError::GroupInit(format!(
                                "malformed hello from {addr}"
                            )))
                        }
                    };
                    if peer == 0 || peer >= world_size || slots[peer - 1].is_some() {
                        return Err(TrainError::GroupInit(format!(
                            "rank {peer} from {addr} is invalid or already joined"
                        )));
                    }
                    debug!(peer, %addr, "rank joined");
                    slots[peer - 1] = Some(stream);
                    joined += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(TrainError::GroupInit(format!(
                            "only {joined} of {} ranks joined before the deadline",
                            world_size - 1
                        )));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(init_err(e)),
            }
        }
        Ok(slots.into_iter().flatten().collect())
    }

    fn dial_hub(rank: usize, master: SocketAddr, deadline: Instant) -> Result<TcpStream> {
        let mut stream = loop {
            match TcpStream::connect(master) {
                Ok(stream) => break stream,
                Err(e) if Instant::now() >= deadline => {
                    return Err(TrainError::GroupInit(format!("connect to {master}: {e}")))
                }
                Err(_) => thread::sleep(POLL_INTERVAL),
            }
        };
        let init_err = |e: io::Error| TrainError::GroupInit(format!("handshake with {master}: {e}"));
        stream.set_nodelay(true).map_err(init_err)?;
        write_frame(&mut stream, TAG_HELLO, &[rank as f64]).map_err(init_err)?;
        Ok(stream)
    }

    fn lock<'a, T>(op: &'static str, m: &'a Mutex<T>) -> Result<MutexGuard<'a, T>> {
        m.lock().map_err(|_| TrainError::Collective {
            op,
            reason: "transport lock poisoned".into(),
        })
    }
}

impl Communicator for TcpGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_sum(&self, buf: &mut [f64]) -> Result<()> {
        const OP: &str = "all_reduce";
        match &self.role {
            Role::Hub { peers } => {
                let mut peers = Self::lock(OP, peers)?;
                let mut acc = buf.to_vec();
                let mut failure = None;
                // Drain every peer before answering, even after a bad frame.
                for stream in peers.iter_mut() {
                    match expect_frame(OP, stream, TAG_ALL_REDUCE, buf.len())? {
                        Ok(data) => {
                            for (a, v) in acc.iter_mut().zip(data.iter()) {
                                *a += v;
                            }
                        }
                        Err(reason) => failure = Some(reason),
                    }
                }
                if let Some(reason) = failure {
                    for stream in peers.iter_mut() {
                        write_frame(stream, TAG_ABORT, &[]).map_err(collective_err(OP))?;
                    }
                    return Err(TrainError::Collective { op: OP, reason });
                }
                for stream in peers.iter_mut() {
                    write_frame(stream, TAG_ALL_REDUCE, &acc).map_err(collective_err(OP))?;
                }
                buf.copy_from_slice(&acc);
                Ok(())
            }
            Role::Spoke { hub } => {
                let mut hub = Self::lock(OP, hub)?;
                write_frame(&mut hub, TAG_ALL_REDUCE, buf).map_err(collective_err(OP))?;
                let data = expect_frame(OP, &mut hub, TAG_ALL_REDUCE, buf.len())?
                    .map_err(|reason| TrainError::Collective { op: OP, reason })?;
                buf.copy_from_slice(&data);
                Ok(())
            }
        }
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<()> {
        const OP: &str = "broadcast";
        if root >= self.world_size {
            return Err(TrainError::Collective {
                op: OP,
                reason: format!("root {root} outside a group of {}", self.world_size),
            });
        }
        let to_err = |reason| TrainError::Collective { op: OP, reason };
        match &self.role {
            Role::Hub { peers } => {
                let mut peers = Self::lock(OP, peers)?;
                if root != 0 {
                    let data = expect_frame(OP, &mut peers[root - 1], TAG_BROADCAST, buf.len())?
                        .map_err(to_err)?;
                    buf.copy_from_slice(&data);
                }
                for (i, stream) in peers.iter_mut().enumerate() {
                    if i + 1 != root {
                        write_frame(stream, TAG_BROADCAST, buf).map_err(collective_err(OP))?;
                    }
                }
                Ok(())
            }
            Role::Spoke { hub } => {
                let mut hub = Self::lock(OP, hub)?;
                if self.rank == root {
                    write_frame(&mut hub, TAG_BROADCAST, buf).map_err(collective_err(OP))?;
                } else {
                    let data = expect_frame(OP, &mut hub, TAG_BROADCAST, buf.len())?
                        .map_err(to_err)?;
                    buf.copy_from_slice(&data);
                }
                Ok(())
            }
        }
    }

    fn shutdown(&self) -> Result<()> {
        match &self.role {
            Role::Hub { peers } => {
                for stream in Self::lock("shutdown", peers)?.iter() {
                    let _ = stream.shutdown(Shutdown::Both);
                }
            }
            Role::Spoke { hub } => {
                let _ = Self::lock("shutdown", hub)?.shutdown(Shutdown::Both);
            }
        }
        Ok(())
    }
}
