// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Type-erased adapter around [`sw_core::IdGen`].
//!
//! `IdGen: Clone` makes `dyn IdGen` non-object-safe (`clone` returns `Self`),
//! so the executor can't hold an `Arc<dyn IdGen>` directly. [`IdFactory`]
//! closes over a concrete generator once and exposes it as a plain
//! `Fn() -> String`, which erases cleanly.

use std::sync::Arc;
use sw_core::IdGen;

#[derive(Clone)]
pub struct IdFactory(Arc<dyn Fn() -> String + Send + Sync>);

impl IdFactory {
    pub fn new<G: IdGen + 'static>(gen: G) -> Self {
        Self(Arc::new(move || gen.next()))
    }

    pub fn next(&self) -> String {
        (self.0)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_core::SequentialIdGen;

    #[test]
    fn wraps_a_concrete_id_gen() {
        let factory = IdFactory::new(SequentialIdGen::new("fork"));
        assert_eq!(factory.next(), "fork-1");
        assert_eq!(factory.next(), "fork-2");
    }
}
