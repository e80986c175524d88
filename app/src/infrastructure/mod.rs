pub mod service_provider;

/// One independently-running process task, spawned and awaited from `main`.
/// A deliberately small replacement for the teacher's
/// `alice_architecture::hosting::IBackgroundService` (see DESIGN.md): this
/// binary only ever runs one (the WebSocket acceptor), but keeping it as a
/// trait rather than inlining `axum::serve` into `main` keeps `main` itself
/// to bootstrap-and-wait, matching the teacher's own `main.rs` shape.
#[async_trait::async_trait]
pub trait BackgroundService: Send + Sync {
    async fn run(&self);
}
