use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// One node of the cluster and where its cluster RPC server listens.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemberInfo {
    pub node_id: String,
    pub ip_addr: Ipv4Addr,
    pub port: u16,
}

impl MemberInfo {
    pub fn new(node_id: impl Into<String>, ip_addr: Ipv4Addr, port: u16) -> Self {
        MemberInfo {
            node_id: node_id.into(),
            ip_addr,
            port,
        }
    }

    pub(crate) fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip_addr, self.port))
    }
}
