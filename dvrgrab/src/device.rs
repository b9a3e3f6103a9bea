/// A recorder already resolved by discovery: where it lives and the shared
/// secret used for both RPC authentication and download credentials.
#[derive(Debug, Clone)]
pub struct Device {
    pub host: String,
    pub rpc_port: u16,
    /// Port of the embedded web server serving recording downloads.
    pub http_port: u16,
    /// Stable identifier, the service number printed on the unit.
    pub tsn: String,
    /// Media access key.
    pub mak: String,
}

impl Device {
    /// Body identifier the device expects in search commands.
    pub fn body_id(&self) -> String {
        format!("tsn:{}", self.tsn)
    }
}
