//! Command-line parsing. Flag-only, no config file or environment layer —
//! the address grammar and defaults are exactly spec'd, so there's no room
//! (or need) for the layered config system the rest of this workspace uses
//! for its heavier tools.

use anyhow::{Context, Result};
use clap::Parser;
use serve_net::{Address, SocketKind};

#[derive(Parser, Debug)]
#[command(version, about = "Turn a shell command into a network service")]
pub struct Cli {
    /// Address to listen on. See the address grammar in the manual page.
    #[arg(short = 'a', value_name = "ADDRESS")]
    address: Option<String>,

    /// Listen backlog, clamped to [0, SOMAXCONN].
    #[arg(short = 'b', value_name = "BACKLOG", default_value_t = 128, allow_hyphen_values = true)]
    backlog: i32,

    /// Socket type: stream, dgram, or seqpacket.
    #[arg(short = 't', value_name = "TYPE", default_value = "stream")]
    socket_type: String,

    /// Accepted for compatibility; always reports "unimplemented; using
    /// stream" and otherwise has no effect.
    #[arg(short = 'p', value_name = "PROTOCOL")]
    protocol: Option<String>,

    /// Minimum log level for operational diagnostics.
    #[arg(short = 'l', value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Shell command run once per accepted connection.
    command: String,
}

/// Resolved configuration, with every string-typed flag parsed and every
/// numeric flag clamped.
pub struct Config {
    pub address: Address,
    pub backlog: i32,
    pub socket_type: SocketKind,
    pub command: String,
    pub log_level: String,
}

impl Cli {
    pub fn into_config(self) -> Result<Config> {
        let address = match &self.address {
            Some(s) => Address::parse(s).context("parsing -a address")?,
            None => Address::default(),
        };
        let socket_type = SocketKind::parse(&self.socket_type).context("parsing -t type")?;

        if self.protocol.is_some() {
            eprintln!("serve: -p protocol is unimplemented; using stream");
        }

        let somaxconn = libc::SOMAXCONN as i32;
        let backlog = self.backlog.clamp(0, somaxconn);

        Ok(Config {
            address,
            backlog,
            socket_type,
            command: self.command,
            log_level: self.log_level,
        })
    }
}
