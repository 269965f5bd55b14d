use tokio::net::unix::UCred;

/// Kernel-reported identity of the process at the far end of a local stream
/// socket.
///
/// The identity is captured once per connection, at accept time. Pids may be
/// recycled once the peer exits, so it is never re-queried and never derived
/// from anything inside the RPC payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PeerIdentity {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

impl PeerIdentity {
    /// Builds an identity from `SO_PEERCRED` credentials, when the kernel
    /// reported a pid for the peer.
    pub fn from_ucred(cred: UCred) -> Option<Self> {
        cred.pid().map(|pid| Self {
            pid,
            uid: cred.uid(),
            gid: cred.gid(),
        })
    }
}
