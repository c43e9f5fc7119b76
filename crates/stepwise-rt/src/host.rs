// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Host environment: what a running machine can call into.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::capability::{CapabilityTable, Returns};
use crate::{lock, AwaiterResolver, Fault, Value};

pub type HostFn = Arc<dyn Fn(&[Value]) -> Result<Value, Fault> + Send + Sync>;

/// Host functions callable from leaf computations, by name.
#[derive(Default, Clone)]
pub struct HostFunctions {
    map: HashMap<String, HostFn>,
}

impl HostFunctions {
    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.map.insert(name.to_string(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&HostFn> {
        self.map.get(name)
    }
}

/// Where continuations of context-capturing suspensions run.
pub trait ResumeContext: Send + Sync {
    fn post(&self, job: Box<dyn FnOnce() + Send>);
}

/// A resume context that queues jobs until the owner drains them.
#[derive(Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<Box<dyn FnOnce() + Send>>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run queued jobs, including ones posted while draining.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = lock(&self.jobs).pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl ResumeContext for JobQueue {
    fn post(&self, job: Box<dyn FnOnce() + Send>) {
        lock(&self.jobs).push_back(job);
    }
}

/// Everything a machine needs from its host.
pub struct HostEnv {
    functions: HostFunctions,
    capabilities: Arc<CapabilityTable>,
    awaiters: Arc<AwaiterResolver>,
    resume: Option<Arc<dyn ResumeContext>>,
}

impl HostEnv {
    pub fn builder() -> HostEnvBuilder {
        HostEnvBuilder::default()
    }

    /// Environment with no functions and no custom awaitables.
    pub fn empty() -> Arc<Self> {
        Self::builder().build()
    }

    pub fn function(&self, name: &str) -> Option<&HostFn> {
        self.functions.get(name)
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    pub fn awaiters(&self) -> &Arc<AwaiterResolver> {
        &self.awaiters
    }

    pub fn resume_context(&self) -> Option<&Arc<dyn ResumeContext>> {
        self.resume.as_ref()
    }
}

impl fmt::Debug for HostEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostEnv")
            .field("functions", &self.functions.map.len())
            .field("awaiters", &self.awaiters)
            .field("resume_context", &self.resume.is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct HostEnvBuilder {
    functions: HostFunctions,
    capabilities: CapabilityTable,
    resume: Option<Arc<dyn ResumeContext>>,
}

impl HostEnvBuilder {
    pub fn function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.functions.register(name, f);
        self
    }

    pub fn instance_method<F>(mut self, ty: &str, name: &str, returns: Returns, f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.capabilities.register_instance(ty, name, returns, f);
        self
    }

    pub fn extension_method<F>(mut self, ty: &str, name: &str, returns: Returns, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.capabilities.register_extension(ty, name, returns, f);
        self
    }

    pub fn resume_context(mut self, ctx: Arc<dyn ResumeContext>) -> Self {
        self.resume = Some(ctx);
        self
    }

    pub fn build(self) -> Arc<HostEnv> {
        let capabilities = Arc::new(self.capabilities);
        Arc::new(HostEnv {
            functions: self.functions,
            awaiters: Arc::new(AwaiterResolver::new(capabilities.clone())),
            capabilities,
            resume: self.resume,
        })
    }
}
