mod energy_meter;

pub use energy_meter::*;
