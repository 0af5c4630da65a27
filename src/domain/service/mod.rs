pub mod clock;
pub mod fifo_consumption;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fifo_consumption::{plan_fifo_consumption, FifoDebit, FifoPlan};
