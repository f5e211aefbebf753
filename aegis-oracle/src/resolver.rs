use std::sync::Arc;

use aegis_core::error::AuditError;
use aegis_core::source::SourceResult;
use aegis_core::wait::CancelSignal;
use alloy_primitives::Address;
use async_trait::async_trait;

use crate::decompiler::is_trivial_bytecode;
use crate::log::{AuditLog, DECOMPILER_TAG, SilentLog, VERIFIED_SOURCE_TAG};

/// Source as confirmed by the explorer registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSource {
    pub source: String,
    pub contract_name: String,
}

#[async_trait]
pub trait VerifiedSourceProvider: Send + Sync {
    /// `Ok(None)` when the contract is not verified.
    async fn verified_source(&self, address: Address) -> Result<Option<VerifiedSource>, AuditError>;
}

#[async_trait]
pub trait BytecodeSource: Send + Sync {
    /// Deployed bytecode as hex. `0x` for accounts without code.
    async fn bytecode(&self, address: Address) -> Result<String, AuditError>;
}

#[async_trait]
pub trait Decompiler: Send + Sync {
    async fn decompile(&self, bytecode: &str, cancel: &CancelSignal) -> Result<String, AuditError>;
}

/// Picks the best readable form of a contract: verified source first, then
/// decompiled bytecode. Steps run strictly in sequence and never error.
pub struct SourceResolver {
    verified: Arc<dyn VerifiedSourceProvider>,
    bytecode: Arc<dyn BytecodeSource>,
    decompiler: Arc<dyn Decompiler>,
    log: Arc<dyn AuditLog>,
}

impl SourceResolver {
    pub fn new(
        verified: Arc<dyn VerifiedSourceProvider>,
        bytecode: Arc<dyn BytecodeSource>,
        decompiler: Arc<dyn Decompiler>,
    ) -> Self {
        Self {
            verified,
            bytecode,
            decompiler,
            log: Arc::new(SilentLog),
        }
    }

    pub fn with_log(mut self, log: Arc<dyn AuditLog>) -> Self {
        self.log = log;
        self
    }

    pub async fn resolve(&self, address: Address, cancel: &CancelSignal) -> SourceResult {
        match self.verified.verified_source(address).await {
            Ok(Some(found)) if !found.source.trim().is_empty() => {
                self.log.log(&format!(
                    "{VERIFIED_SOURCE_TAG} Verified source found for {address} ({})",
                    found.contract_name
                ));
                return SourceResult::verified(found.source, found.contract_name);
            }
            Ok(_) => {}
            Err(err) => self.log.log(&format!(
                "{VERIFIED_SOURCE_TAG} Source lookup failed for {address}: {err}"
            )),
        }

        self.log.log(&format!(
            "{DECOMPILER_TAG} Unverified contract at {address}, attempting bytecode decompilation"
        ));

        let bytecode = match self.bytecode.bytecode(address).await {
            Ok(code) => code,
            Err(err) => {
                self.log
                    .log(&format!("{DECOMPILER_TAG} Bytecode fetch failed: {err}"));
                return self.exhausted();
            }
        };

        if is_trivial_bytecode(&bytecode) {
            self.log.log(&format!(
                "{DECOMPILER_TAG} No bytecode at {address} (EOA or self-destructed)"
            ));
            return SourceResult::none();
        }

        match self.decompiler.decompile(&bytecode, cancel).await {
            Ok(source) if !source.trim().is_empty() => {
                let result = SourceResult::decompiled(address, source);
                self.log.log(&format!(
                    "{DECOMPILER_TAG} Decompiled {address} as {} ({} chars)",
                    result.contract_name,
                    result.source.chars().count()
                ));
                result
            }
            Ok(_) => {
                self.log
                    .log(&format!("{DECOMPILER_TAG} Decompiler returned empty output"));
                self.exhausted()
            }
            Err(err) => {
                self.log
                    .log(&format!("{DECOMPILER_TAG} Decompilation failed: {err}"));
                self.exhausted()
            }
        }
    }

    fn exhausted(&self) -> SourceResult {
        self.log.log(&format!(
            "{DECOMPILER_TAG} All source retrieval methods exhausted, AI will be skipped"
        ));
        SourceResult::none()
    }
}

pub mod doubles {
    //! In-memory collaborators for tests and local runs.

    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    pub struct StaticVerifiedSource(pub Result<Option<VerifiedSource>, AuditError>);

    impl StaticVerifiedSource {
        pub fn found(source: &str, contract_name: &str) -> Self {
            Self(Ok(Some(VerifiedSource {
                source: source.to_string(),
                contract_name: contract_name.to_string(),
            })))
        }

        pub fn missing() -> Self {
            Self(Ok(None))
        }
    }

    #[async_trait]
    impl VerifiedSourceProvider for StaticVerifiedSource {
        async fn verified_source(
            &self,
            _address: Address,
        ) -> Result<Option<VerifiedSource>, AuditError> {
            self.0.clone()
        }
    }

    pub struct StaticBytecode(pub Result<String, AuditError>);

    impl StaticBytecode {
        pub fn code(hex: &str) -> Self {
            Self(Ok(hex.to_string()))
        }
    }

    #[async_trait]
    impl BytecodeSource for StaticBytecode {
        async fn bytecode(&self, _address: Address) -> Result<String, AuditError> {
            self.0.clone()
        }
    }

    /// Returns a fixed answer and counts invocations.
    pub struct CountingDecompiler {
        answer: Result<String, AuditError>,
        calls: AtomicU32,
    }

    impl CountingDecompiler {
        pub fn returning(answer: Result<String, AuditError>) -> Self {
            Self {
                answer,
                calls: AtomicU32::new(0),
            }
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Decompiler for CountingDecompiler {
        async fn decompile(
            &self,
            _bytecode: &str,
            _cancel: &CancelSignal,
        ) -> Result<String, AuditError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }
}
