use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type Task = dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync;

/// Coalescing executor around a single rebuild task.
///
/// `run` never blocks. If the task is idle it starts; if it is already
/// running a rerun flag is set instead, and however many `run` calls
/// arrive while the task is busy, exactly one extra execution follows.
/// This keeps reload storms down to "one run now, one run after" without
/// ever starving a late caller.
#[derive(Clone)]
pub struct Rescheduler {
	inner: Arc<Inner>,
}

struct Inner {
	task: Box<Task>,
	state: parking_lot::Mutex<State>,
}

#[derive(Default)]
struct State {
	running: bool,
	rerun: bool,
}

impl Rescheduler {
	pub fn new<F, Fut>(task: F) -> Self
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		Rescheduler {
			inner: Arc::new(Inner {
				task: Box::new(move || Box::pin(task())),
				state: parking_lot::Mutex::new(State::default()),
			}),
		}
	}

	pub fn run(&self) {
		{
			let mut state = self.inner.state.lock();
			if state.running {
				state.rerun = true;
				return;
			}
			state.running = true;
		}
		let inner = self.inner.clone();
		tokio::spawn(async move {
			loop {
				(inner.task)().await;
				let mut state = inner.state.lock();
				if state.rerun {
					state.rerun = false;
				} else {
					state.running = false;
					return;
				}
			}
		});
	}
}
