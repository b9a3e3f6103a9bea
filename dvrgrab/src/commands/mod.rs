mod archive;
mod decode;
mod list;

pub use archive::Archive;
pub use decode::Decode;
pub use list::List;

use crate::device::Device;
use anyhow::Result;
use clap::{Args as ClapArgs, ColorChoice, Parser, Subcommand};
use mindrpc::TlsIdentity;
use std::path::PathBuf;

/// Archive recordings from a networked video recorder as plain MPEG
/// transport streams.
#[derive(Debug, Parser)]
#[command(version, author = "clitic <clitic21@gmail.com>", about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// When to output colored text.
    #[arg(long, global = true, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Archive(Archive),
    Decode(Decode),
    List(List),
}

/// A recorder as resolved by discovery, passed in by flag.
#[derive(Debug, ClapArgs)]
pub struct DeviceOpts {
    /// Device network address.
    #[arg(long, help_heading = "Device Options")]
    pub host: String,

    /// RPC port on the device.
    #[arg(long, help_heading = "Device Options", default_value_t = mindrpc::DEFAULT_PORT)]
    pub rpc_port: u16,

    /// Port of the device's embedded web server.
    #[arg(long, help_heading = "Device Options", default_value_t = 80)]
    pub http_port: u16,

    /// Device service number (the stable identifier on the unit).
    #[arg(long, help_heading = "Device Options")]
    pub tsn: String,

    /// Media access key for the account the device is bound to.
    #[arg(long, help_heading = "Device Options")]
    pub mak: String,

    /// Client certificate bundle (PKCS#12) for the RPC handshake.
    #[arg(long, help_heading = "Device Options")]
    pub identity: PathBuf,

    /// Password protecting the certificate bundle.
    #[arg(long, help_heading = "Device Options", default_value = "")]
    pub identity_password: String,
}

impl DeviceOpts {
    pub fn resolve(&self) -> Result<(Device, TlsIdentity)> {
        let identity = TlsIdentity::from_pkcs12_file(&self.identity, &self.identity_password)?;

        Ok((
            Device {
                host: self.host.clone(),
                rpc_port: self.rpc_port,
                http_port: self.http_port,
                tsn: self.tsn.clone(),
                mak: self.mak.clone(),
            },
            identity,
        ))
    }
}
