use crate::{Command, Error, Result, frame};
use log::{debug, info};
use native_tls::{Identity, TlsConnector, TlsStream};
use rand::Rng;
use serde_json::Value;
use std::{
    fs,
    io::{BufReader, Write},
    net::TcpStream,
    path::Path,
};

/// Port the device's RPC listener binds.
pub const DEFAULT_PORT: u16 = 1413;

/// Client certificate material for the mutual-TLS handshake.
pub struct TlsIdentity {
    pkcs12: Vec<u8>,
    password: String,
}

impl TlsIdentity {
    pub fn from_pkcs12_file<P: AsRef<Path>>(path: P, password: &str) -> Result<Self> {
        Ok(Self {
            pkcs12: fs::read(path)?,
            password: password.to_owned(),
        })
    }

    pub fn from_pkcs12(pkcs12: Vec<u8>, password: &str) -> Self {
        Self {
            pkcs12,
            password: password.to_owned(),
        }
    }
}

/// One authenticated RPC connection to one device.
///
/// Holds the monotonically increasing request sequence and the session
/// identifier stamped into every frame. Requests are serialized: issuing a
/// command takes `&mut self`, so a session shared between workers must sit
/// behind a mutex, which is exactly the per-device serialization the
/// archive pipeline wants.
pub struct Session {
    stream: BufReader<TlsStream<TcpStream>>,
    seq: u32,
    session_id: u32,
}

impl Session {
    /// Connects, handshakes and authenticates in one step.
    ///
    /// The device presents a fixed vendor self-signed certificate, so
    /// server-certificate and hostname verification are intentionally
    /// disabled; the device authenticates us through the client
    /// certificate, and we authenticate it through the media access key
    /// exchange.
    pub fn connect(host: &str, port: u16, identity: &TlsIdentity, mak: &str) -> Result<Self> {
        let identity = Identity::from_pkcs12(&identity.pkcs12, &identity.password)?;
        let connector = TlsConnector::builder()
            .identity(identity)
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;

        debug!("connecting to {host}:{port}");
        let tcp = TcpStream::connect((host, port))?;
        let stream = connector
            .connect(host, tcp)
            .map_err(|e| Error::Handshake(e.to_string()))?;

        let mut session = Self {
            stream: BufReader::new(stream),
            seq: 0,
            session_id: rand::thread_rng().gen_range(0x1..0x100000),
        };

        let mut auth = Command::body_authenticate(mak);
        auth.execute(&mut session)?;

        if !auth.auth_accepted() {
            let message = auth
                .message()
                .unwrap_or("device refused the credential")
                .to_owned();
            return Err(Error::AuthRejected(message));
        }

        info!("authenticated with {host} (session 0x{:06x})", session.session_id);
        Ok(session)
    }

    /// Sends one request and reads its single response. Exclusive access
    /// keeps at most one request in flight per session, and the sequence
    /// number is unique and increasing for the life of the connection.
    pub(crate) fn round_trip(&mut self, request_type: &str, body: &Value) -> Result<Value> {
        self.seq += 1;
        debug!("{request_type} (rpc id {})", self.seq);

        let request = frame::encode_request(self.seq, self.session_id, request_type, body);
        let stream = self.stream.get_mut();
        stream.write_all(&request)?;
        stream.flush()?;

        frame::read_response(&mut self.stream)
    }
}
