//! Child order id → instrument routing.
//!
//! Order events only carry the child order id, so every id must be
//! registered here before the transport can report on it, and removed once
//! the child is terminal to keep the map bounded. A lookup miss means the
//! event belongs to no live child and must not be guessed at.

use std::collections::HashMap;

use vwx_md::Instrument;

use crate::types::ChildOrderId;

#[derive(Clone, Debug, Default)]
pub struct OrderRoutes {
    map: HashMap<ChildOrderId, Instrument>,
}

impl OrderRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-registering an id overwrites the previous route.
    pub fn register(&mut self, order_id: ChildOrderId, instrument: Instrument) {
        self.map.insert(order_id, instrument);
    }

    pub fn instrument(&self, order_id: &ChildOrderId) -> Option<&Instrument> {
        self.map.get(order_id)
    }

    /// Unknown ids are ignored.
    pub fn deregister(&mut self, order_id: &ChildOrderId) {
        self.map.remove(order_id);
    }

    /// Drop every route to `instrument`; returns how many were removed.
    pub fn deregister_instrument(&mut self, instrument: &Instrument) -> usize {
        let before = self.map.len();
        self.map.retain(|_, i| i != instrument);
        before - self.map.len()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_lookup_deregister() {
        let mut m = OrderRoutes::new();
        let spy = Instrument::new("SPY", "USA");
        let id = ChildOrderId::new("c1");
        m.register(id.clone(), spy.clone());
        assert_eq!(m.instrument(&id), Some(&spy));
        m.deregister(&id);
        assert!(m.instrument(&id).is_none());
        assert!(m.is_empty());
        m.deregister(&id);
    }

    #[test]
    fn deregister_instrument_only_touches_that_instrument() {
        let mut m = OrderRoutes::new();
        let spy = Instrument::new("SPY", "USA");
        let ibm = Instrument::new("IBM", "USA");
        m.register(ChildOrderId::new("a"), spy.clone());
        m.register(ChildOrderId::new("b"), spy.clone());
        m.register(ChildOrderId::new("c"), ibm.clone());
        assert_eq!(m.deregister_instrument(&spy), 2);
        assert_eq!(m.len(), 1);
        assert_eq!(m.instrument(&ChildOrderId::new("c")), Some(&ibm));
    }
}
