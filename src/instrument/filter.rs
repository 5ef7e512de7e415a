//! Structural exclusions that apply regardless of registration.

use log::debug;

use crate::instrument::MethodDescriptor;

/// Decides whether a registered method may be rewritten at all.
///
/// Constructors are never instrumented: a probe call ahead of the base constructor call would
/// hand an unconstructed `this` to managed code. Methods without a body (abstract, extern,
/// runtime implemented) have nothing to rewrite.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstrumentationFilter;

impl InstrumentationFilter {
    /// Returns `true` if `descriptor` is structurally eligible for rewriting.
    #[must_use]
    pub fn should_instrument(&self, descriptor: &MethodDescriptor<'_>) -> bool {
        if descriptor.is_constructor() {
            debug!("Skipping constructor {}", descriptor.full_name());
            return false;
        }

        if descriptor.il_code.is_empty() {
            debug!("Skipping {} - no method body", descriptor.full_name());
            return false;
        }

        true
    }
}
