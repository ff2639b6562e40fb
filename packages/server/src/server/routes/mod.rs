// HTTP routes
pub mod health;
pub mod runs;
pub mod stream;
pub mod validators;

pub use health::*;
pub use runs::*;
pub use stream::*;
pub use validators::*;
