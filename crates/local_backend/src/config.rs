use std::{
    fmt,
    net::Ipv4Addr,
    path::PathBuf,
};

use clap::Parser;

#[derive(Parser, Clone)]
#[clap(author = "Graphhub")]
pub struct LocalConfig {
    /// Directory holding the hub's store.
    #[clap(long, env = "STORE_LOCATION", default_value = "graphhub_store")]
    pub store_location: PathBuf,

    /// Host interface to bind to.
    #[clap(short, long, default_value = "0.0.0.0")]
    pub interface: Ipv4Addr,

    /// Host port the daemon should bind to.
    #[clap(short, long, env = "SERVER_PORT", default_value = "8080")]
    pub port: u16,

    /// Deployment profile; `test` quiets the default log level.
    #[clap(long, env = "PROFILE", default_value = "dev")]
    pub profile: String,
}

impl fmt::Debug for LocalConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("store_location", &self.store_location)
            .field("port", &self.port)
            .field("profile", &self.profile)
            .finish()
    }
}

impl LocalConfig {
    pub fn http_bind_address(&self) -> ([u8; 4], u16) {
        (self.interface.octets(), self.port)
    }

    pub fn db_path(&self) -> PathBuf {
        self.store_location.join("hub.sqlite3")
    }
}
