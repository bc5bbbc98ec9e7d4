pub mod clock;
pub mod connection;
pub mod generator;
pub mod keygen;
pub mod protocol;
pub mod report;
pub mod runner;
pub mod session;
pub mod values;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use connection::{Connection, ReadState, WriteState};
pub use generator::Generator;
pub use keygen::KeyGenerator;
pub use report::Report;
pub use runner::{RunReport, run};
pub use session::Session;
