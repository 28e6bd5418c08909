//! Media probing and delivery-profile normalization over external tools.

mod error;
mod executor;
mod normalize;
mod probe;
mod types;

pub use error::{MediaError, MediaResult};
pub use executor::{CommandExecutor, SystemCommandExecutor};
pub use normalize::{MediaNormalizer, TranscodeProfile};
pub use probe::MediaProbe;
pub use types::{NormalizeOutcome, NormalizeStrategy, NormalizedMedia, ProbeResult, NO_AUDIO};
