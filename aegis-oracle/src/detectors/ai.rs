use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aegis_core::error::AuditError;
use aegis_core::risk::{DetectorFamily, RiskBit, RiskMask};
use aegis_core::source::{SourceProvenance, SourceResult};
use alloy_primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

pub const SYSTEM_PROMPT: &str = "You are a smart contract security auditor reviewing an ERC-20 token \
before an automated agent trades it. Look for: hidden or dynamic transfer taxes (obfuscated_tax), \
owner-only functions that mint, blacklist, pause or seize balances (privilege_escalation), \
delegatecall or calls to unverified external addresses that can change token behaviour \
(external_call_risk), and time, block or counter triggered behaviour changes (logic_bomb). \
Answer with a single JSON object: {\"obfuscated_tax\": bool, \"privilege_escalation\": bool, \
\"external_call_risk\": bool, \"logic_bomb\": bool, \"reasoning\": string}.";

/// Receives answer fragments in arrival order.
pub type ChunkSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// A completion endpoint the AI detector can ask.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, prompt: &str) -> Result<String, AuditError>;

    /// Like `complete`, but hands each text fragment to `on_chunk` as it
    /// arrives. Returns the whole answer. Clients without a streaming
    /// endpoint deliver the answer as one fragment.
    async fn complete_streaming(
        &self,
        system_prompt: &str,
        prompt: &str,
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, AuditError> {
        let answer = self.complete(system_prompt, prompt).await?;
        on_chunk(&answer);
        Ok(answer)
    }
}

/// A ModelClient backed by a rig completion model.
pub struct RigModelClient<M: rig::completion::CompletionModel> {
    model: M,
    provider: String,
}

impl<M: rig::completion::CompletionModel> RigModelClient<M> {
    pub fn new(model: M, provider: impl Into<String>) -> Self {
        Self {
            model,
            provider: provider.into(),
        }
    }

    fn request(&self, system_prompt: &str, prompt: &str) -> rig::completion::CompletionRequest {
        self.model
            .completion_request(prompt.to_string())
            .preamble(system_prompt.to_string())
            .build()
    }

    fn no_text(&self) -> AuditError {
        AuditError::upstream(&self.provider, 200, "completion carried no text")
    }
}

#[async_trait]
impl<M> ModelClient for RigModelClient<M>
where
    M: rig::completion::CompletionModel + Send + Sync + 'static,
    M::Response: Send + Sync,
    M::StreamingResponse: Send,
{
    async fn complete(&self, system_prompt: &str, prompt: &str) -> Result<String, AuditError> {
        let response = self
            .model
            .completion(self.request(system_prompt, prompt))
            .await
            .map_err(|err| AuditError::upstream(&self.provider, 0, err.to_string()))?;

        let text = response
            .choice
            .iter()
            .filter_map(|content| match content {
                rig::message::AssistantContent::Text(t) => Some(t.text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(self.no_text());
        }
        Ok(text)
    }

    async fn complete_streaming(
        &self,
        system_prompt: &str,
        prompt: &str,
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, AuditError> {
        let mut stream = self
            .model
            .stream(self.request(system_prompt, prompt))
            .await
            .map_err(|err| AuditError::upstream(&self.provider, 0, err.to_string()))?;

        let mut text = String::new();
        while let Some(item) = stream.next().await {
            let content =
                item.map_err(|err| AuditError::upstream(&self.provider, 0, err.to_string()))?;
            if let rig::streaming::StreamedAssistantContent::Text(chunk) = content {
                on_chunk(&chunk.text);
                text.push_str(&chunk.text);
            }
        }

        if text.trim().is_empty() {
            return Err(self.no_text());
        }
        Ok(text)
    }
}

/// Scripted model: answers in order, then repeats its standing answer if it has one.
pub struct MockModelClient {
    responses: Mutex<VecDeque<Result<String, AuditError>>>,
    standing: Option<String>,
    /// Fragments streamed on every call; their concatenation is the answer.
    chunks: Option<Vec<String>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockModelClient {
    pub fn new(responses: Vec<Result<String, AuditError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            standing: None,
            chunks: None,
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Streams the given fragments on every call.
    pub fn streaming(chunks: &[&str]) -> Self {
        Self {
            standing: Some(chunks.concat()),
            chunks: Some(chunks.iter().map(|chunk| chunk.to_string()).collect()),
            ..Self::new(Vec::new())
        }
    }

    /// Answers every call with the given flags.
    pub fn flagging(bits: &[RiskBit], reasoning: &str) -> Self {
        let mut answer = serde_json::Map::new();
        for bit in RiskBit::AI {
            answer.insert(bit.key().to_string(), bits.contains(&bit).into());
        }
        answer.insert("reasoning".to_string(), reasoning.into());
        Self {
            standing: Some(serde_json::Value::Object(answer).to_string()),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    async fn record(&self, prompt: &str) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn complete(&self, _system_prompt: &str, prompt: &str) -> Result<String, AuditError> {
        self.record(prompt).await;
        if let Some(next) = self.responses.lock().ok().and_then(|mut queue| queue.pop_front()) {
            return next;
        }
        self.standing
            .clone()
            .ok_or_else(|| AuditError::pipeline("mock model has no scripted response"))
    }

    async fn complete_streaming(
        &self,
        system_prompt: &str,
        prompt: &str,
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, AuditError> {
        let Some(chunks) = &self.chunks else {
            let answer = self.complete(system_prompt, prompt).await?;
            on_chunk(&answer);
            return Ok(answer);
        };
        self.record(prompt).await;
        for chunk in chunks {
            on_chunk(chunk);
        }
        Ok(chunks.concat())
    }
}

/// What a detector sees about the contract under audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorInput {
    pub token: Address,
    pub source: String,
    pub contract_name: String,
    pub provenance: SourceProvenance,
}

impl DetectorInput {
    pub fn from_source(token: Address, source: &SourceResult) -> Self {
        Self {
            token,
            source: source.source.clone(),
            contract_name: source.contract_name.clone(),
            provenance: source.provenance(),
        }
    }
}

/// One model's opinion on the AI family of bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAssessment {
    pub model: String,
    pub mask: RiskMask,
    pub reasoning: String,
}

/// A named model slot in the AI consensus.
#[derive(Clone)]
pub struct AiDetector {
    name: String,
    client: Arc<dyn ModelClient>,
}

impl AiDetector {
    pub fn new(name: impl Into<String>, client: Arc<dyn ModelClient>) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn assess(&self, input: &DetectorInput) -> Result<ModelAssessment, AuditError> {
        self.assess_streaming(input, &|_: &str| {}).await
    }

    /// Assess while forwarding the raw answer fragments to `on_chunk`.
    pub async fn assess_streaming(
        &self,
        input: &DetectorInput,
        on_chunk: ChunkSink<'_>,
    ) -> Result<ModelAssessment, AuditError> {
        let answer = self
            .client
            .complete_streaming(SYSTEM_PROMPT, &build_prompt(input), on_chunk)
            .await?;
        parse_assessment(&self.name, &answer)
    }
}

pub fn build_prompt(input: &DetectorInput) -> String {
    let mut prompt = format!(
        "Token: {}\nContract: {}\n",
        input.token, input.contract_name
    );
    if input.provenance.is_decompiled {
        prompt.push_str(
            "Note: no verified source exists. The code below is decompiled pseudocode \
             reconstructed from bytecode; names are synthetic and control flow may be lossy.\n",
        );
    }
    prompt.push_str("\n```\n");
    prompt.push_str(&input.source);
    prompt.push_str("\n```\n");
    prompt
}

/// Read a model answer. Tolerates prose or code fences around the JSON object.
pub fn parse_assessment(model: &str, answer: &str) -> Result<ModelAssessment, AuditError> {
    let (Some(start), Some(end)) = (answer.find('{'), answer.rfind('}')) else {
        return Err(AuditError::pipeline(format!("{model}: answer has no JSON object")));
    };
    if end < start {
        return Err(AuditError::pipeline(format!("{model}: answer has no JSON object")));
    }

    let value: serde_json::Value = serde_json::from_str(&answer[start..=end])
        .map_err(|err| AuditError::pipeline(format!("{model}: invalid JSON answer: {err}")))?;

    let mut mask = RiskMask::CLEAN;
    for bit in RiskBit::AI {
        let triggered = value
            .get(bit.key())
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        mask.set(bit, triggered);
    }

    Ok(ModelAssessment {
        model: model.to_string(),
        mask: mask.only(DetectorFamily::Ai),
        reasoning: value
            .get("reasoning")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::source::SourceProvider;

    fn input(source: &SourceResult) -> DetectorInput {
        DetectorInput::from_source(Address::ZERO, source)
    }

    #[test]
    fn fenced_answer_is_parsed() {
        let answer = "Here is my review:\n```json\n{\"obfuscated_tax\": false, \"privilege_escalation\": true, \"external_call_risk\": false, \"logic_bomb\": false, \"reasoning\": \"owner can blacklist\"}\n```";
        let assessment = parse_assessment("Llama-3", answer).expect("parsed");
        assert_eq!(assessment.mask.bits(), 32);
        assert_eq!(assessment.reasoning, "owner can blacklist");
    }

    #[test]
    fn static_keys_in_answer_are_ignored() {
        let answer = r#"{"known_honeypot": true, "logic_bomb": true}"#;
        let assessment = parse_assessment("m", answer).expect("parsed");
        assert_eq!(assessment.mask.bits(), 128);
    }

    #[test]
    fn answer_without_json_is_rejected() {
        assert!(parse_assessment("m", "looks fine to me").is_err());
        assert!(parse_assessment("m", "} backwards {").is_err());
    }

    #[test]
    fn decompiled_input_is_labelled_in_prompt() {
        let decompiled = SourceResult::decompiled(Address::ZERO, "function f() {}");
        let verified = SourceResult::verified("contract T{}", "T");

        assert_eq!(input(&decompiled).provenance.provider, SourceProvider::Decompiled);
        assert!(build_prompt(&input(&decompiled)).contains("decompiled pseudocode"));
        assert!(!build_prompt(&input(&verified)).contains("decompiled pseudocode"));
    }

    #[tokio::test]
    async fn detector_uses_its_client() {
        let client = Arc::new(MockModelClient::flagging(
            &[RiskBit::ObfuscatedTax, RiskBit::ExternalCallRisk],
            "tax set by oracle",
        ));
        let detector = AiDetector::new("OpenAI GPT-4o", client.clone());

        let assessment = detector
            .assess(&input(&SourceResult::verified("contract T{}", "T")))
            .await
            .expect("assessment");

        assert_eq!(assessment.model, "OpenAI GPT-4o");
        assert_eq!(assessment.mask.bits(), 16 | 64);
        assert_eq!(client.prompts().len(), 1);
        assert!(client.prompts()[0].contains("contract T{}"));
    }

    #[tokio::test]
    async fn streamed_fragments_reassemble_into_the_answer() {
        let client = Arc::new(MockModelClient::streaming(&[
            "{\"privilege_escalation\": true, ",
            "\"reasoning\": \"owner can ",
            "blacklist\"}",
        ]));
        let detector = AiDetector::new("Llama-3", client.clone());
        let seen = Mutex::new(Vec::new());
        let on_chunk = |chunk: &str| {
            if let Ok(mut seen) = seen.lock() {
                seen.push(chunk.to_string());
            }
        };

        let assessment = detector
            .assess_streaming(&input(&SourceResult::verified("contract T{}", "T")), &on_chunk)
            .await
            .expect("assessment");

        assert_eq!(assessment.mask.bits(), 32);
        assert_eq!(assessment.reasoning, "owner can blacklist");
        assert_eq!(seen.lock().expect("lock").len(), 3);
        assert_eq!(client.prompts().len(), 1);
    }
}
