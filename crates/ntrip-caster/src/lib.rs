//! Source ingest, mount resolution, and client fan-out for an NTRIP
//! caster, built on the single-writer [`ntrip_ring`] chunk ring.

mod auth;
mod client;
mod config;
mod context;
mod error;
mod login;
mod mount;
mod ordmap;
mod pool;
mod source;
mod stats;
mod sourcetable;
mod transport;

pub use auth::{Authenticator, Credentials, StaticAuthenticator};
pub use client::{Client, ClientId, Lifecycle};
pub use config::Config;
pub use context::CasterContext;
pub use error::{KickReason, LoginError};
pub use login::{login_client, login_source, ClientLoginRequest, SourceLoginRequest};
pub use mount::{Alias, MountRegistry, MountRequest, ParsedMount};
pub use pool::Pool;
pub use source::{Source, SourceKind, SourceState};
pub use stats::{MountStats, SourceStats};
pub use sourcetable::{NullSourcetableSink, SourcetableSink};
pub use transport::{
    ClientChunkState, Framing, HttpChunkState, OutputFraming, ReadAttempt, RtpOutState, Socket,
    WriteAttempt,
};
