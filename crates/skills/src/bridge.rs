//! Bridges an async fetch into the synchronous `body_loader` contract that
//! `sa_engine_domain::Skill` requires: a plain `Fn() -> io::Result<String>`,
//! invoked lazily at injection time, long after the scan that discovered
//! the skill has finished. Filesystem and
//! in-memory sources satisfy that contract directly; network sources need
//! this to fold their async client calls back into it.

use std::future::Future;

/// Runs `fetch` to completion from inside a synchronous closure. Valid only
/// from a multi-thread tokio runtime worker thread, which is where this
/// engine always runs its tool handlers; panics under the current-thread
/// flavor for the same reason `block_in_place` does.
pub fn block_on_body<F, Fut>(fetch: F) -> std::io::Result<String>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::io::Result<String>>,
{
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fetch()))
}
