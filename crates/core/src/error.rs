//! Error types for the lanscout discovery engine.

use thiserror::Error;

/// Result type alias for lanscout operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lanscout operations.
///
/// Construction-time errors (`NoScannersOrSweeper`, `NoInterface`,
/// `InterfaceNotFound`, `NoIpv4Address`, `InvalidTimeout`) are the only
/// fatal ones; everything a scanner can produce mid-run is surfaced as an
/// [`Event::Error`](crate::Event::Error) and never aborts the engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Engine built without any discovery strategy.
    #[error("no scanners or sweeper configured; at least one is required")]
    NoScannersOrSweeper,

    /// Engine built without a network interface.
    #[error("no network interface provided")]
    NoInterface,

    /// Named interface does not exist on this host.
    ///
    /// The message wording is load-bearing: downstream packagers match on
    /// the "no such network interface" phrase.
    #[error("no such network interface: {name}")]
    InterfaceNotFound { name: String },

    /// Interface exists but carries no IPv4 address.
    #[error("interface {name} has no IPv4 address")]
    NoIpv4Address { name: String },

    /// No usable default interface could be auto-detected.
    #[error("no default network interface found")]
    NoDefaultInterface,

    /// Scan timeout must be strictly positive.
    #[error("scan timeout must be positive")]
    InvalidTimeout,

    /// A scanner failed mid-run.
    #[error("scanner {name} failed: {source}")]
    Scanner {
        name: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// SSDP scans need a deadline to bound the response window.
    #[error("ssdp scan requires a deadline")]
    DeadlineRequired,

    /// An operation was cut short by cancellation. Scanners swallow this
    /// (cancellation is their normal exit); explicit probe runs report it.
    #[error("operation cancelled")]
    Cancelled,

    /// A received packet could not be parsed.
    #[error("malformed {protocol} packet: {reason}")]
    MalformedPacket {
        protocol: &'static str,
        reason: String,
    },

    /// OUI registry refresh got a non-success HTTP status.
    #[error("non-2xx response fetching OUI registry: {status}")]
    OuiFetchStatus { status: u16 },

    /// OUI CSV data did not have the expected shape.
    #[error("unexpected OUI CSV format: {reason}")]
    OuiFormat { reason: String },

    /// I/O errors from sockets, /proc, or the cache directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport failure during OUI refresh.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// CSV decode failure in OUI data.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// DNS wire-format failure in the mDNS scanner.
    #[error("DNS protocol error: {0}")]
    Dns(#[from] trust_dns_proto::error::ProtoError),
}

impl Error {
    /// Wrap a scanner-produced error with the scanner's name.
    pub fn scanner(name: &'static str, source: Error) -> Self {
        Error::Scanner {
            name,
            source: Box::new(source),
        }
    }

    /// True for errors that prevent engine construction or startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::NoScannersOrSweeper
                | Error::NoInterface
                | Error::InterfaceNotFound { .. }
                | Error::NoIpv4Address { .. }
                | Error::NoDefaultInterface
                | Error::InvalidTimeout
        )
    }
}
