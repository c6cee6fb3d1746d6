//! Transfer limit functions.
//!
//! A transfer limit caps the throughput a single operation may receive from its device at a given simulation time,
//! regardless of the device fair share. Typical sources of limits are network paths (an operation reading a file
//! which is sent to a client cannot go faster than the path) and the opposite side of a linked operation.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use sugars::{boxed, rc};

/// Per-operation throughput ceiling as a function of simulation time.
pub enum TransferLimit {
    /// No ceiling, the operation takes whatever the device gives.
    Unlimited,
    /// Constant ceiling.
    Fixed(f64),
    /// Ceiling computed from the simulation time.
    Dynamic(Box<dyn Fn(f64) -> f64>),
    /// Ceiling stored in a cell which is updated by the owner of the operation, e.g. once per time slice.
    Shared(Rc<Cell<f64>>),
}

impl TransferLimit {
    /// Creates dynamic limit from the given closure.
    pub fn dynamic<F: Fn(f64) -> f64 + 'static>(f: F) -> Self {
        Self::Dynamic(boxed!(f))
    }

    /// Creates shared limit with the given initial value and returns it along with the handle for updating it.
    pub fn shared(initial: f64) -> (Self, Rc<Cell<f64>>) {
        let cell = rc!(Cell::new(initial));
        (Self::Shared(cell.clone()), cell)
    }

    /// Returns the ceiling at `time`. Negative values are treated as zero.
    pub fn at(&self, time: f64) -> f64 {
        let value = match self {
            TransferLimit::Unlimited => f64::INFINITY,
            TransferLimit::Fixed(value) => *value,
            TransferLimit::Dynamic(f) => f(time),
            TransferLimit::Shared(cell) => cell.get(),
        };
        value.max(0.)
    }

    /// Returns whether the limit never restricts the operation.
    pub fn is_unlimited(&self) -> bool {
        matches!(self, TransferLimit::Unlimited)
    }
}

impl Default for TransferLimit {
    fn default() -> Self {
        Self::Unlimited
    }
}

impl fmt::Debug for TransferLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferLimit::Unlimited => write!(f, "Unlimited"),
            TransferLimit::Fixed(value) => write!(f, "Fixed({})", value),
            TransferLimit::Dynamic(_) => write!(f, "Dynamic"),
            TransferLimit::Shared(cell) => write!(f, "Shared({})", cell.get()),
        }
    }
}
