//! Built-in DSP unit family implementations.
//!
//! Each submodule exposes a `static DESCRIPTOR: UnitDescriptor` grounded on
//! the contract in [`crate::unit`]; [`register_builtins`] wires them all
//! into a fresh [`crate::voice::UnitRegistry`].

pub mod delay;
pub mod envelope;
pub mod fm;
pub mod inline;
pub mod osc;
pub mod panmix;
pub mod statevar_filter;
pub mod waveshaper;
pub mod xinsert;

use crate::voice::UnitRegistry;

pub fn register_builtins(registry: &mut UnitRegistry) {
    registry.register(&osc::DESCRIPTOR);
    registry.register(&statevar_filter::DESCRIPTOR);
    registry.register(&fm::DESCRIPTOR);
    registry.register(&delay::DESCRIPTOR);
    registry.register(&waveshaper::DESCRIPTOR);
    registry.register(&envelope::DESCRIPTOR);
    registry.register(&xinsert::DESCRIPTOR);
    registry.register(&inline::DESCRIPTOR);
    registry.register(&panmix::DESCRIPTOR);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_builtins_populates_all_families() {
        let mut r = UnitRegistry::new();
        register_builtins(&mut r);
        for name in ["osc", "svfilter", "fm2", "delay", "waveshaper", "envelope", "xinsert", "inline", "panmix"] {
            assert!(r.get(name).is_some(), "missing descriptor: {name}");
        }
    }
}
