use crate::chain::ChainError;
use crate::config::ConfigError;
use crate::store::StoreError;

/// Top-level error for the service and listener surfaces
#[derive(Debug)]
pub enum AnalyticsError {
    Store(StoreError),
    Chain(ChainError),
    /// A contract was added for a chain with no configured connection
    NoProviderForChain(u64),
    Validation(String),
    Config(ConfigError),
}

impl From<StoreError> for AnalyticsError {
    fn from(err: StoreError) -> Self {
        AnalyticsError::Store(err)
    }
}

impl From<ChainError> for AnalyticsError {
    fn from(err: ChainError) -> Self {
        AnalyticsError::Chain(err)
    }
}

impl From<ConfigError> for AnalyticsError {
    fn from(err: ConfigError) -> Self {
        AnalyticsError::Config(err)
    }
}

impl std::fmt::Display for AnalyticsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalyticsError::Store(e) => write!(f, "{}", e),
            AnalyticsError::Chain(e) => write!(f, "{}", e),
            AnalyticsError::NoProviderForChain(id) => {
                write!(f, "No chain connection configured for chain {}", id)
            }
            AnalyticsError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AnalyticsError::Config(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AnalyticsError {}
