#[derive(Debug, thiserror::Error)]
pub enum NetoflowError {
    #[error("invalid IPv4 address format: {0:?}")]
    InvalidAddressFormat(String),
    #[error("invalid prefix length: {0:?} (must be 0-32)")]
    InvalidPrefixLength(String),
    #[error("invalid CIDR block: {0:?} (expected a.b.c.d/n)")]
    InvalidCidr(String),
    #[error("malformed packet descriptor at line {line}: {detail}")]
    MalformedDescriptor { line: usize, detail: String },
    #[error("config error: {0}")]
    Config(String),
    #[error("cannot read config file: {0}")]
    ConfigIo(#[source] std::io::Error),
    #[error("cannot read descriptors: {0}")]
    Input(#[source] std::io::Error),
    #[error("{0}")]
    InsufficientPermission(String),
    #[error("capture device error: {0}")]
    CaptureDevice(String),
    #[error("serialization error: {0}")]
    Serialization(#[source] std::io::Error),
    #[error("fatal: {0}")]
    Fatal(String),
}
