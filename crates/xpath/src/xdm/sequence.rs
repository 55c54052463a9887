//! The pull protocol every evaluated expression speaks.
//!
//! A [`XdmSequenceStream`] is a single-pass producer. Each [`pull`](XdmSequenceStream::pull)
//! answers with one of three states:
//!
//! * [`Pull::Done`] – the sequence is exhausted; further pulls keep answering `Done`.
//! * [`Pull::Ready`] – the next item.
//! * [`Pull::Suspended`] – a facade or node-factory call is not answerable yet. The caller
//!   awaits the [`Suspension`] and pulls again; the cursor resumes where it stopped.
//!
//! Synchronous trees never produce `Suspended`, so draining them costs nothing extra.
//! Cursors only commit their own state after every facade call they need returned
//! [`Fetch::Ready`], which keeps a re-pull after suspension equivalent to the first attempt.

use super::{XdmItem, XdmSequence};
use crate::engine::runtime::Error;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// An awaitable handed out when evaluation has to wait for an asynchronous facade.
pub struct Suspension(Pin<Box<dyn Future<Output = ()>>>);

impl Suspension {
    pub fn new(fut: impl Future<Output = ()> + 'static) -> Self {
        Self(Box::pin(fut))
    }

    /// Blocks the current thread until the suspension resolves.
    pub fn wait(self) {
        futures_lite::future::block_on(self);
    }
}

impl Future for Suspension {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.0.as_mut().poll(cx)
    }
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Suspension")
    }
}

/// Result of a facade call: either available now or after a suspension.
#[derive(Debug)]
pub enum Fetch<T> {
    Ready(T),
    Pending(Suspension),
}

impl<T> Fetch<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetch<U> {
        match self {
            Fetch::Ready(v) => Fetch::Ready(f(v)),
            Fetch::Pending(s) => Fetch::Pending(s),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Fetch::Ready(_))
    }

    /// Drives the fetch to completion by blocking on suspensions.
    pub fn block(self, mut retry: impl FnMut() -> Fetch<T>) -> T {
        let mut current = self;
        loop {
            match current {
                Fetch::Ready(v) => return v,
                Fetch::Pending(s) => {
                    s.wait();
                    current = retry();
                }
            }
        }
    }
}

/// The three-way answer of a cursor pull.
#[derive(Debug)]
pub enum Pull<T> {
    Done,
    Ready(T),
    Suspended(Suspension),
}

impl<T> From<Option<T>> for Pull<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Pull::Done, Pull::Ready)
    }
}

/// Unwraps a [`Fetch`] inside a cursor, propagating suspension as [`Pull::Suspended`].
macro_rules! ready_or_suspend {
    ($fetch:expr) => {
        match $fetch {
            $crate::xdm::Fetch::Ready(v) => v,
            $crate::xdm::Fetch::Pending(s) => return Ok($crate::xdm::Pull::Suspended(s)),
        }
    };
}

/// Unwraps a [`Fetch`] inside a function returning `Result<Fetch<_>, Error>`.
macro_rules! ready_or_pending {
    ($fetch:expr) => {
        match $fetch {
            $crate::xdm::Fetch::Ready(v) => v,
            $crate::xdm::Fetch::Pending(s) => return Ok($crate::xdm::Fetch::Pending(s)),
        }
    };
}

/// Pulls from a stream inside a cursor; `None` means the stream is done.
macro_rules! pull_or_suspend {
    ($stream:expr) => {
        match $stream.pull()? {
            $crate::xdm::Pull::Ready(item) => Some(item),
            $crate::xdm::Pull::Done => None,
            $crate::xdm::Pull::Suspended(s) => return Ok($crate::xdm::Pull::Suspended(s)),
        }
    };
}

/// Pulls from a stream inside a function returning `Result<Fetch<_>, Error>`.
macro_rules! pull_or_pending {
    ($stream:expr) => {
        match $stream.pull()? {
            $crate::xdm::Pull::Ready(item) => Some(item),
            $crate::xdm::Pull::Done => None,
            $crate::xdm::Pull::Suspended(s) => return Ok($crate::xdm::Fetch::Pending(s)),
        }
    };
}

pub(crate) use {pull_or_pending, pull_or_suspend, ready_or_pending, ready_or_suspend};

/// A resumable producer of items.
pub trait SequenceCursor<N> {
    fn pull(&mut self) -> Result<Pull<XdmItem<N>>, Error>;
}

impl<N, F> SequenceCursor<N> for F
where
    F: FnMut() -> Result<Pull<XdmItem<N>>, Error>,
{
    fn pull(&mut self) -> Result<Pull<XdmItem<N>>, Error> {
        self()
    }
}

/// Lazy, single-pass sequence.
pub struct XdmSequenceStream<N> {
    cursor: Box<dyn SequenceCursor<N>>,
}

impl<N> fmt::Debug for XdmSequenceStream<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("XdmSequenceStream")
    }
}

impl<N: 'static> XdmSequenceStream<N> {
    pub fn new(cursor: impl SequenceCursor<N> + 'static) -> Self {
        Self { cursor: Box::new(cursor) }
    }

    pub fn empty() -> Self {
        Self::new(|| Ok(Pull::Done))
    }

    pub fn once(item: XdmItem<N>) -> Self {
        let mut slot = Some(item);
        Self::new(move || Ok(slot.take().map_or(Pull::Done, Pull::Ready)))
    }

    pub fn from_vec(items: XdmSequence<N>) -> Self {
        let mut it = items.into_iter();
        Self::new(move || Ok(it.next().map_or(Pull::Done, Pull::Ready)))
    }

    pub fn error(err: Error) -> Self {
        let mut slot = Some(err);
        Self::new(move || match slot.take() {
            Some(e) => Err(e),
            None => Ok(Pull::Done),
        })
    }

    /// A stream computed as a whole on first pull. The producer is invoked again after each
    /// suspension until it answers `Ready`, so it must be free of side effects up to that point.
    pub fn deferred(mut produce: impl FnMut() -> Result<Fetch<XdmSequence<N>>, Error> + 'static) -> Self {
        let mut items: Option<std::vec::IntoIter<XdmItem<N>>> = None;
        Self::new(move || {
            if items.is_none() {
                match produce()? {
                    Fetch::Ready(v) => items = Some(v.into_iter()),
                    Fetch::Pending(s) => return Ok(Pull::Suspended(s)),
                }
            }
            Ok(items.as_mut().and_then(Iterator::next).map_or(Pull::Done, Pull::Ready))
        })
    }

    pub fn pull(&mut self) -> Result<Pull<XdmItem<N>>, Error> {
        self.cursor.pull()
    }

    /// Drains the stream, blocking on suspensions.
    pub fn materialize(mut self) -> Result<XdmSequence<N>, Error> {
        let mut out = Vec::new();
        loop {
            match self.pull()? {
                Pull::Done => return Ok(out),
                Pull::Ready(item) => out.push(item),
                Pull::Suspended(s) => s.wait(),
            }
        }
    }

    /// Drains the stream, awaiting suspensions.
    pub async fn materialize_async(mut self) -> Result<XdmSequence<N>, Error> {
        let mut out = Vec::new();
        loop {
            match self.pull()? {
                Pull::Done => return Ok(out),
                Pull::Ready(item) => out.push(item),
                Pull::Suspended(s) => s.await,
            }
        }
    }

    /// Maps each item, preserving suspension.
    pub fn map_items(mut self, mut f: impl FnMut(XdmItem<N>) -> Result<XdmItem<N>, Error> + 'static) -> Self {
        Self::new(move || match self.pull()? {
            Pull::Ready(item) => f(item).map(Pull::Ready),
            other => Ok(other),
        })
    }
}

/// Accumulates a stream across suspensions.
pub struct SequenceCollector<N> {
    stream: XdmSequenceStream<N>,
    buffer: XdmSequence<N>,
}

impl<N: 'static> SequenceCollector<N> {
    pub fn new(stream: XdmSequenceStream<N>) -> Self {
        Self { stream, buffer: Vec::new() }
    }

    /// Pulls until done. Items collected before a suspension are kept for the next call.
    pub fn poll_collect(&mut self) -> Result<Fetch<XdmSequence<N>>, Error> {
        while let Some(item) = pull_or_pending!(self.stream) {
            self.buffer.push(item);
        }
        Ok(Fetch::Ready(std::mem::take(&mut self.buffer)))
    }
}

struct SharedState<N> {
    source: Option<XdmSequenceStream<N>>,
    buffer: Vec<XdmItem<N>>,
    failure: Option<Error>,
    finished: bool,
}

/// A lazily filled replay buffer: many readers, one underlying producer.
///
/// Variable bindings use this so that `$x` may be read any number of times while the
/// bound expression is still only evaluated as far as some reader needed.
pub struct SharedSequence<N>(Rc<RefCell<SharedState<N>>>);

impl<N> Clone for SharedSequence<N> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<N> fmt::Debug for SharedSequence<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.0.borrow();
        f.debug_struct("SharedSequence").field("buffered", &st.buffer.len()).field("finished", &st.finished).finish()
    }
}

impl<N: Clone + 'static> SharedSequence<N> {
    pub fn new(source: XdmSequenceStream<N>) -> Self {
        Self(Rc::new(RefCell::new(SharedState { source: Some(source), buffer: Vec::new(), failure: None, finished: false })))
    }

    pub fn from_items(items: XdmSequence<N>) -> Self {
        Self(Rc::new(RefCell::new(SharedState { source: None, buffer: items, failure: None, finished: true })))
    }

    fn fetch(&self, index: usize) -> Result<Pull<XdmItem<N>>, Error> {
        if let Some(item) = self.0.borrow().buffer.get(index) {
            return Ok(Pull::Ready(item.clone()));
        }
        let mut source = {
            let mut st = self.0.borrow_mut();
            if let Some(err) = &st.failure {
                return Err(err.clone());
            }
            if st.finished {
                return Ok(Pull::Done);
            }
            match st.source.take() {
                Some(s) => s,
                // a reader re-entered while the source is being pulled
                None => return Ok(Pull::Done),
            }
        };
        let outcome = source.pull();
        let mut st = self.0.borrow_mut();
        st.source = Some(source);
        match outcome {
            Ok(Pull::Ready(item)) => {
                st.buffer.push(item.clone());
                Ok(Pull::Ready(item))
            }
            Ok(Pull::Done) => {
                st.finished = true;
                st.source = None;
                Ok(Pull::Done)
            }
            Ok(Pull::Suspended(s)) => Ok(Pull::Suspended(s)),
            Err(e) => {
                st.failure = Some(e.clone());
                st.source = None;
                Err(e)
            }
        }
    }

    /// A fresh reader positioned at the first item.
    pub fn reader(&self) -> XdmSequenceStream<N> {
        let shared = self.clone();
        let mut index = 0usize;
        XdmSequenceStream::new(move || {
            let pulled = shared.fetch(index)?;
            if matches!(pulled, Pull::Ready(_)) {
                index += 1;
            }
            Ok(pulled)
        })
    }

    /// Materializes the whole binding, blocking on suspensions.
    pub fn items(&self) -> Result<XdmSequence<N>, Error> {
        self.reader().materialize()
    }

    /// Items already known without pulling further, if the source is exhausted.
    pub fn known_items(&self) -> Option<XdmSequence<N>> {
        let st = self.0.borrow();
        st.finished.then(|| st.buffer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xdm::AtomicValue;
    use std::cell::Cell;

    type Item = XdmItem<()>;

    fn int(i: i64) -> Item {
        XdmItem::Atomic(AtomicValue::integer(i))
    }

    #[test]
    fn from_vec_yields_in_order_then_done_forever() {
        let mut s = XdmSequenceStream::from_vec(vec![int(1), int(2)]);
        assert!(matches!(s.pull().unwrap(), Pull::Ready(_)));
        assert!(matches!(s.pull().unwrap(), Pull::Ready(_)));
        assert!(matches!(s.pull().unwrap(), Pull::Done));
        assert!(matches!(s.pull().unwrap(), Pull::Done));
    }

    #[test]
    fn collector_keeps_items_across_suspension() {
        let step = Rc::new(Cell::new(0));
        let st = Rc::clone(&step);
        let stream = XdmSequenceStream::new(move || {
            let n = st.get();
            st.set(n + 1);
            Ok(match n {
                0 => Pull::Ready(int(1)),
                1 => Pull::Suspended(Suspension::new(async {})),
                2 => Pull::Ready(int(2)),
                _ => Pull::Done,
            })
        });
        let mut c = SequenceCollector::new(stream);
        assert!(matches!(c.poll_collect().unwrap(), Fetch::Pending(_)));
        match c.poll_collect().unwrap() {
            Fetch::Ready(v) => assert_eq!(v, vec![int(1), int(2)]),
            Fetch::Pending(_) => panic!("should be ready"),
        }
    }

    #[test]
    fn shared_sequence_pulls_source_once() {
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let mut left = 3;
        let src = XdmSequenceStream::new(move || {
            c.set(c.get() + 1);
            if left == 0 {
                return Ok(Pull::Done);
            }
            left -= 1;
            Ok(Pull::Ready(int(left)))
        });
        let shared = SharedSequence::new(src);
        let a = shared.reader().materialize().unwrap();
        let b = shared.reader().materialize().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn deferred_retries_after_suspension() {
        let mut first = true;
        let mut s = XdmSequenceStream::deferred(move || {
            if first {
                first = false;
                return Ok(Fetch::Pending(Suspension::new(async {})));
            }
            Ok(Fetch::Ready(vec![int(7)]))
        });
        assert!(matches!(s.pull().unwrap(), Pull::Suspended(_)));
        assert!(matches!(s.pull().unwrap(), Pull::Ready(_)));
        assert!(matches!(s.pull().unwrap(), Pull::Done));
    }
}
