//! Entry point for the end-to-end scenario suite.
//! Each scenario exercises the real processor/retry/reconciliation code
//! against in-memory index mocks and a temporary repository tree, so the
//! suite runs without a Postgres instance or ML service on hand.

mod integration;
