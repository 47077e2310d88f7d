//! End-to-end scenarios across the store, resolver, index and query service.

mod scenarios;
