/*! Integration tests for Trellis.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - crdt: Positions, mutations, loading and diffing documents
 * - reconciler: Conflict rules when applying ops with each provenance
 * - history: Undo and redo through a client session
 * - session: Several clients and a server storage converging in one room
 * - storage: Drivers, healing and the server-side op rules
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trellis=info".parse().unwrap()))
        .with_test_writer()
        .try_init();
}

mod crdt;
mod helpers;
mod history;
mod reconciler;
mod session;
mod storage;
