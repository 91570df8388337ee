//! Test helpers for integration tests.
//!
//! Provides a counting data-source factory, a source provider that tracks
//! reader lifetimes, and script builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use charthost::{
    CapabilityFactory, ContextFactory, EngineSettings, Namespace, ParameterSet, ProvidedSource,
    ReaderScript, Scope, Script, SourceProvider, SourceReader, UserDataCapability,
};
use mlua::{UserData, UserDataMethods};

/// Data-source factory exposed to scripts as `datasourceFactory`.
///
/// `datasourceFactory:create(kind)` returns `{ kind = kind, owner = label }`.
#[derive(Clone)]
pub struct TestDataSources {
    pub label: &'static str,
    pub created: Arc<AtomicUsize>,
}

impl TestDataSources {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl UserData for TestDataSources {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("create", |lua, this, kind: String| {
            this.created.fetch_add(1, Ordering::SeqCst);
            let source = lua.create_table()?;
            source.set("kind", kind)?;
            source.set("owner", this.label)?;
            Ok(source)
        });
    }
}

pub fn capability(label: &'static str) -> Arc<dyn CapabilityFactory> {
    Arc::new(UserDataCapability::new(TestDataSources::new(label)))
}

/// Counters shared by every reader a [`TrackingProvider`] hands out.
#[derive(Default)]
pub struct ReaderCounters {
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
}

impl ReaderCounters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct TrackedReader {
    inner: Cursor<Vec<u8>>,
    fail_read: bool,
    counters: Arc<ReaderCounters>,
}

impl Read for TrackedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_read {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream broke"));
        }
        self.inner.read(buf)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Provider with replaceable scripts whose readers count their own release.
#[derive(Default)]
pub struct TrackingProvider {
    scripts: Mutex<HashMap<String, String>>,
    broken: Mutex<Vec<String>>,
    pub counters: Arc<ReaderCounters>,
}

impl TrackingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, id: &str, text: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(id.to_string(), text.to_string());
        self.broken.lock().unwrap().retain(|b| b != id);
    }

    pub fn remove(&self, id: &str) {
        self.scripts.lock().unwrap().remove(id);
    }

    /// Make reads of `id` fail after the reader was opened.
    pub fn break_stream(&self, id: &str) {
        self.broken.lock().unwrap().push(id.to_string());
    }
}

impl SourceProvider for TrackingProvider {
    fn open(&self, id: &str) -> io::Result<SourceReader> {
        let text = self
            .scripts
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{id} not found")))?;
        let fail_read = self.broken.lock().unwrap().iter().any(|b| b == id);

        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(SourceReader::new(
            id,
            TrackedReader {
                inner: Cursor::new(text.into_bytes()),
                fail_read,
                counters: Arc::clone(&self.counters),
            },
        ))
    }
}

pub fn factory() -> Arc<ContextFactory> {
    ContextFactory::new(EngineSettings::default())
}

pub fn new_scope(factory: &ContextFactory) -> Box<dyn Namespace> {
    Box::new(Scope::new(&factory.enter().unwrap()).unwrap())
}

/// A reader-based script for `id` served by `provider`.
pub fn reader_script(
    factory: &Arc<ContextFactory>,
    provider: &Arc<TrackingProvider>,
    id: &str,
) -> ReaderScript {
    let shared: Arc<dyn SourceProvider> = provider.clone();
    Script::new(Arc::clone(factory), ProvidedSource::new(id, shared))
}

pub fn params(value: serde_json::Value) -> ParameterSet {
    value
        .as_object()
        .cloned()
        .expect("params must be a JSON object")
}
