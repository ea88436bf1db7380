//! Completion callbacks that cannot unwind into their caller.
//!
//! Connection code usually invokes a completion callback from deep inside its own control
//! flow. A panic escaping that callback would unwind through the connection and could leave
//! it half way through an operation. [`Deferred::wrap`] runs the callback synchronously and
//! first, catches any panic, and hands it to a [`FaultScheduler`] which raises it again on a
//! later scheduling turn, after the invoking stack has returned.
//!
//! # Example
//!
//! ```ignore
//! use docprovider_core::deferred::defer_rethrow;
//!
//! let callback = defer_rethrow(|result: ProviderResult<u64>| {
//!     let count = result.unwrap();
//!     println!("{count} documents");
//! });
//!
//! // Any panic inside the closure resurfaces on a fresh task, not here.
//! callback(Ok(3));
//! ```

use std::{
    any::Any,
    fmt::{self, Debug},
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use tokio::runtime::Handle;

/// A panic caught while running a completion callback.
pub struct CallbackFault {
    message: String,
    payload: Box<dyn Any + Send + 'static>,
}

impl CallbackFault {
    /// Wraps a panic payload as returned by [`std::panic::catch_unwind`].
    pub fn from_payload(payload: Box<dyn Any + Send + 'static>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };

        Self { message, payload }
    }

    /// The panic message, or a placeholder when the payload was not a string.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the original panic payload.
    pub fn into_payload(self) -> Box<dyn Any + Send + 'static> {
        self.payload
    }

    /// Raises the fault as a new panic on the current stack.
    ///
    /// The panic goes through the process panic hook, so it is reported like any other
    /// unhandled panic.
    pub fn raise(self) -> ! {
        panic!("completion callback panicked: {}", self.message)
    }
}

impl Debug for CallbackFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackFault")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Decides where and when a caught callback panic resurfaces.
///
/// Implementations must not raise the fault on the calling stack.
pub trait FaultScheduler: Send + Sync + Debug {
    /// Schedules `fault` to be surfaced after the current call stack has unwound.
    fn schedule(&self, fault: CallbackFault);
}

/// Re-raises callback faults on the next scheduling turn.
///
/// Inside a tokio runtime the fault is raised on a newly spawned task; outside of one it is
/// raised on a new thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct NextTick;

impl FaultScheduler for NextTick {
    fn schedule(&self, fault: CallbackFault) {
        tracing::error!(message = fault.message(), "completion callback panicked");

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    fault.raise();
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    fault.raise();
                });
            }
        }
    }
}

/// Wraps completion callbacks so their panics are deferred to a [`FaultScheduler`].
#[derive(Clone, Debug)]
pub struct Deferred {
    scheduler: Arc<dyn FaultScheduler>,
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new(Arc::new(NextTick))
    }
}

impl Deferred {
    /// Creates a wrapper that routes caught panics to `scheduler`.
    pub fn new(scheduler: Arc<dyn FaultScheduler>) -> Self {
        Self { scheduler }
    }

    /// Returns a callback with the same signature as `callback`.
    ///
    /// The returned callback invokes `callback` immediately with the same argument. If it
    /// panics, the panic is caught and scheduled instead of unwinding into the caller.
    pub fn wrap<A, F>(&self, callback: F) -> impl FnOnce(A) + Send + 'static + use<A, F>
    where
        A: 'static,
        F: FnOnce(A) + Send + 'static,
    {
        let scheduler = Arc::clone(&self.scheduler);

        move |argument: A| {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(argument))) {
                scheduler.schedule(CallbackFault::from_payload(payload));
            }
        }
    }

    /// Wraps an optional callback. A missing callback yields `None`.
    pub fn wrap_optional<A, F>(
        &self,
        callback: Option<F>,
    ) -> Option<impl FnOnce(A) + Send + 'static + use<A, F>>
    where
        A: 'static,
        F: FnOnce(A) + Send + 'static,
    {
        callback.map(|callback| self.wrap(callback))
    }
}

/// Wraps `callback` with the default [`NextTick`] scheduler.
pub fn defer_rethrow<A, F>(callback: F) -> impl FnOnce(A) + Send + 'static + use<A, F>
where
    A: 'static,
    F: FnOnce(A) + Send + 'static,
{
    Deferred::default().wrap(callback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::{
        panic,
        sync::{
            Mutex,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };
    use tokio::sync::mpsc::{UnboundedSender, error::TryRecvError, unbounded_channel};

    /// Surfaces faults through a channel from a spawned task, like `NextTick` but observable.
    #[derive(Debug)]
    struct ChannelScheduler(UnboundedSender<String>);

    impl FaultScheduler for ChannelScheduler {
        fn schedule(&self, fault: CallbackFault) {
            let sender = self.0.clone();
            tokio::spawn(async move {
                let _ = sender.send(fault.message().to_string());
            });
        }
    }

    #[derive(Debug, Default)]
    struct Collecting(Mutex<Vec<String>>);

    impl FaultScheduler for Collecting {
        fn schedule(&self, fault: CallbackFault) {
            self.0.lock().unwrap().push(fault.message().to_string());
        }
    }

    #[test]
    fn runs_callback_synchronously_with_its_argument() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);

        let callback = Deferred::new(Arc::new(Collecting::default()))
            .wrap(move |value: u32| *sink.lock().unwrap() = Some(value));
        callback(7);

        assert_eq!(*seen.lock().unwrap(), Some(7));
    }

    #[test]
    fn missing_callback_wraps_to_nothing() {
        let deferred = Deferred::default();

        assert!(deferred.wrap_optional::<u32, fn(u32)>(None).is_none());
        assert!(deferred.wrap_optional(Some(|_: u32| {})).is_some());
    }

    #[test]
    fn captures_string_and_str_payloads() {
        let collecting = Arc::new(Collecting::default());
        let deferred = Deferred::new(collecting.clone());

        deferred.wrap(|_: ()| panic!("static message"))(());
        deferred.wrap(|code: i32| panic!("code {code}"))(42);

        assert_eq!(
            *collecting.0.lock().unwrap(),
            vec!["static message".to_string(), "code 42".to_string()]
        );
    }

    #[tokio::test]
    async fn panic_surfaces_only_after_the_caller_returns() {
        let (sender, mut receiver) = unbounded_channel();
        let deferred = Deferred::new(Arc::new(ChannelScheduler(sender)));
        let returned = AtomicBool::new(false);

        // Stands in for connection code that invokes the callback and then keeps going.
        let invoke = |callback: Box<dyn FnOnce(u8) + Send>| {
            callback(1);
            returned.store(true, Ordering::SeqCst);
        };
        invoke(Box::new(deferred.wrap(|_: u8| panic!("handler failed"))));

        assert!(returned.load(Ordering::SeqCst));
        assert_eq!(receiver.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(receiver.recv().await.as_deref(), Some("handler failed"));
    }

    #[tokio::test]
    #[serial]
    async fn next_tick_raises_on_a_spawned_task() {
        let raised = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&raised);
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let payload = info.payload();
            let message = payload
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| payload.downcast_ref::<&str>().map(|message| message.to_string()));

            if let Some(message) = message.filter(|message| message.starts_with("completion")) {
                sink.lock().unwrap().push(message);
            }
        }));

        defer_rethrow(|_: ()| panic!("raised later"))(());
        let before_return = raised.lock().unwrap().len();

        for _ in 0..100 {
            if !raised.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic::set_hook(previous);

        assert_eq!(before_return, 0);
        assert_eq!(
            *raised.lock().unwrap(),
            vec!["completion callback panicked: raised later".to_string()]
        );
    }
}
