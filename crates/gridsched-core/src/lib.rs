pub mod clock;
pub mod config;
pub mod expr;
pub mod ring;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Algorithm, ConfigError, GridConfig};
pub use expr::{Bindings, ExprError, ExprResult, ILLEGAL_PRICE, Price, PriceEvaluator};
pub use ring::RingBuffer;
pub use types::*;
