use std::sync::mpsc::Sender;

use super::citation::sources_from_chunks;
use super::classify::analyze_query;
use super::prompt::{
    build_messages, candidates_reply, patient_not_found_reply, verify_patient_reply,
    LOCK_REQUIRED_REPLY, NO_PATIENT_CONTEXT_REPLY,
};
use super::retrieval::retrieve;
use super::types::{
    AnswerRoute, ChatAnswer, ChatRequest, EmbeddingModel, LlmGenerate, RetrievalTarget,
    RouteAnalysis, RouterModel, VectorSearch,
};
use super::RagError;
use crate::identity::Roster;
use crate::models::{patient_log_ref, PatientRecord, QueryMode, RouteIntent};

/// What to do with a question once its mode and routing are known.
#[derive(Debug, Clone, PartialEq)]
enum Plan {
    Retrieve(RetrievalTarget),
    /// Fixed reply, no external calls beyond routing.
    Reply(String),
}

/// Question answering pipeline.
///
/// Coordinates: route → embed → vector search → prompt → generate → cite.
pub struct ChatPipeline<'a> {
    generator: &'a dyn LlmGenerate,
    embedder: &'a dyn EmbeddingModel,
    store: &'a dyn VectorSearch,
    router: &'a dyn RouterModel,
    roster: &'a Roster,
    top_k: usize,
}

impl<'a> ChatPipeline<'a> {
    pub fn new(
        generator: &'a dyn LlmGenerate,
        embedder: &'a dyn EmbeddingModel,
        store: &'a dyn VectorSearch,
        router: &'a dyn RouterModel,
        roster: &'a Roster,
        top_k: usize,
    ) -> Self {
        Self {
            generator,
            embedder,
            store,
            router,
            roster,
            top_k,
        }
    }

    /// Answer a question with a single blocking completion.
    pub fn answer(&self, request: &ChatRequest) -> Result<ChatAnswer, RagError> {
        self.run(request, None)
    }

    /// Answer a question, forwarding completion tokens through `token_tx`.
    ///
    /// Fixed replies are sent as a single token.
    pub fn answer_streaming(
        &self,
        request: &ChatRequest,
        token_tx: Sender<String>,
    ) -> Result<ChatAnswer, RagError> {
        self.run(request, Some(token_tx))
    }

    /// Routing only, used by Auto mode and the route endpoint.
    pub fn analyze(&self, question: &str, locked: Option<&PatientRecord>) -> RouteAnalysis {
        analyze_query(self.router, self.roster, question, locked)
    }

    fn run(
        &self,
        request: &ChatRequest,
        token_tx: Option<Sender<String>>,
    ) -> Result<ChatAnswer, RagError> {
        let (plan, analysis) = self.plan(request);

        let target = match plan {
            Plan::Reply(text) => {
                tracing::info!(mode = request.mode.as_str(), "Answered without retrieval");
                if let Some(tx) = token_tx {
                    let _ = tx.send(text.clone());
                }
                return Ok(ChatAnswer {
                    text,
                    sources: Vec::new(),
                    route: AnswerRoute::NoRetrieval,
                    chunks_used: 0,
                    analysis,
                });
            }
            Plan::Retrieve(target) => target,
        };

        let chunks = retrieve(
            &target,
            &request.question,
            self.embedder,
            self.store,
            self.top_k,
        )?;
        let messages = build_messages(&target, &chunks, &request.question);

        let text = match token_tx {
            Some(tx) => self.generator.generate_streaming(&messages, tx)?,
            None => self.generator.generate(&messages)?,
        };

        let route = match &target {
            RetrievalTarget::Patient(patient_id) => {
                tracing::info!(
                    patient = %patient_log_ref(patient_id),
                    chunks = chunks.len(),
                    "Answered from patient records"
                );
                AnswerRoute::PatientRecords {
                    patient_id: patient_id.clone(),
                }
            }
            RetrievalTarget::General => {
                tracing::info!(chunks = chunks.len(), "Answered from general documents");
                AnswerRoute::GeneralDocuments
            }
        };

        Ok(ChatAnswer {
            text: text.trim().to_string(),
            sources: sources_from_chunks(&chunks),
            route,
            chunks_used: chunks.len(),
            analysis,
        })
    }

    fn plan(&self, request: &ChatRequest) -> (Plan, Option<RouteAnalysis>) {
        let locked = request.locked.as_ref();
        match request.mode {
            QueryMode::General => (Plan::Retrieve(RetrievalTarget::General), None),
            QueryMode::PatientSpecific => match locked {
                Some(p) => (
                    Plan::Retrieve(RetrievalTarget::Patient(p.patient_id.clone())),
                    None,
                ),
                None => (Plan::Reply(LOCK_REQUIRED_REPLY.to_string()), None),
            },
            QueryMode::Auto => {
                let analysis = self.analyze(&request.question, locked);
                let plan = plan_for_analysis(&analysis, locked);
                (plan, Some(analysis))
            }
        }
    }
}

/// Map a routing result to a plan. Only the verified (locked) patient's
/// records are ever retrieved.
fn plan_for_analysis(analysis: &RouteAnalysis, locked: Option<&PatientRecord>) -> Plan {
    match analysis.intent {
        RouteIntent::General => Plan::Retrieve(RetrievalTarget::General),
        RouteIntent::PatientSpecificUseLocked => match locked {
            Some(p) => Plan::Retrieve(RetrievalTarget::Patient(p.patient_id.clone())),
            None => Plan::Reply(NO_PATIENT_CONTEXT_REPLY.to_string()),
        },
        RouteIntent::PatientSpecific => match (&analysis.resolved_patient, locked) {
            (Some(resolved), Some(l)) if resolved.patient_id == l.patient_id => {
                Plan::Retrieve(RetrievalTarget::Patient(l.patient_id.clone()))
            }
            (Some(resolved), _) => Plan::Reply(verify_patient_reply(resolved)),
            (None, _) if !analysis.candidates.is_empty() => {
                Plan::Reply(candidates_reply(&analysis.candidates))
            }
            (None, _) => Plan::Reply(patient_not_found_reply(
                analysis.patient_reference.as_deref(),
            )),
        },
        RouteIntent::PatientSpecificNotFound => Plan::Reply(patient_not_found_reply(
            analysis.patient_reference.as_deref(),
        )),
        RouteIntent::PatientSpecificNoContext => {
            Plan::Reply(NO_PATIENT_CONTEXT_REPLY.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::pipeline::rag::prompt::{GENERAL_SYSTEM_PROMPT, PATIENT_SYSTEM_PROMPT};
    use crate::pipeline::rag::retrieval::InMemoryVectorSearch;
    use crate::pipeline::rag::types::LlmMessage;

    /// Records the prompts it receives and answers with a fixed text.
    struct MockLlm {
        response: String,
        seen: Mutex<Vec<Vec<LlmMessage>>>,
    }

    impl MockLlm {
        fn new(response: &str) -> Self {
            Self {
                response: response.into(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn last_prompt(&self) -> Vec<LlmMessage> {
            self.seen.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    impl LlmGenerate for MockLlm {
        fn generate(&self, messages: &[LlmMessage]) -> Result<String, RagError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(self.response.clone())
        }
    }

    /// Splits its answer into word tokens when streaming.
    struct WordStreamingLlm;

    impl LlmGenerate for WordStreamingLlm {
        fn generate(&self, _messages: &[LlmMessage]) -> Result<String, RagError> {
            Ok("Letrozole 2.5 mg daily".into())
        }

        fn generate_streaming(
            &self,
            messages: &[LlmMessage],
            token_tx: Sender<String>,
        ) -> Result<String, RagError> {
            let text = self.generate(messages)?;
            for word in text.split_inclusive(' ') {
                let _ = token_tx.send(word.to_string());
            }
            Ok(text)
        }
    }

    struct CountingEmbedder(AtomicUsize);

    impl CountingEmbedder {
        fn new() -> Self {
            Self(AtomicUsize::new(0))
        }
    }

    impl EmbeddingModel for CountingEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, RagError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0])
        }
    }

    struct FixedRouter(&'static str);

    impl RouterModel for FixedRouter {
        fn classify(&self, _system: &str, _query: &str) -> Result<String, RagError> {
            Ok(self.0.to_string())
        }
    }

    fn patient(id: &str, first: &str, last: &str) -> PatientRecord {
        PatientRecord {
            patient_id: id.into(),
            first_name: first.into(),
            last_name: last.into(),
            dob: "1985-06-01".into(),
        }
    }

    fn roster() -> Roster {
        Roster::from_records(vec![
            patient("IVF001", "Priya", "Sharma"),
            patient("IVF002", "Alex", "Morgan"),
            patient("CARD100", "Ravi", "Sharma"),
        ])
    }

    fn store() -> InMemoryVectorSearch {
        let mut s = InMemoryVectorSearch::new();
        s.add_patient_chunk("p1", "IVF001", "Letrozole 2.5 mg daily", vec![1.0, 0.0]);
        s.add_patient_chunk("p2", "IVF002", "Metformin 500 mg", vec![1.0, 0.0]);
        s.add_general_document("g1", "Fever after surgery: check wound", vec![1.0, 0.0]);
        s
    }

    fn request(question: &str, mode: QueryMode, locked: Option<PatientRecord>) -> ChatRequest {
        ChatRequest {
            question: question.into(),
            mode,
            locked,
        }
    }

    #[test]
    fn patient_mode_without_lock_makes_no_external_calls() {
        let llm = MockLlm::new("unused");
        let embedder = CountingEmbedder::new();
        let router = FixedRouter("{}");
        let (store, roster) = (store(), roster());
        let pipeline = ChatPipeline::new(&llm, &embedder, &store, &router, &roster, 6);

        let answer = pipeline
            .answer(&request("What meds?", QueryMode::PatientSpecific, None))
            .unwrap();

        assert_eq!(answer.text, LOCK_REQUIRED_REPLY);
        assert_eq!(answer.route, AnswerRoute::NoRetrieval);
        assert_eq!(llm.calls(), 0);
        assert_eq!(embedder.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn patient_mode_retrieves_only_locked_patient() {
        let llm = MockLlm::new("  Letrozole.  ");
        let embedder = CountingEmbedder::new();
        let router = FixedRouter("{}");
        let (store, roster) = (store(), roster());
        let pipeline = ChatPipeline::new(&llm, &embedder, &store, &router, &roster, 6);

        let locked = patient("IVF001", "Priya", "Sharma");
        let answer = pipeline
            .answer(&request("What meds?", QueryMode::PatientSpecific, Some(locked)))
            .unwrap();

        assert_eq!(answer.text, "Letrozole.");
        assert_eq!(
            answer.route,
            AnswerRoute::PatientRecords {
                patient_id: "IVF001".into()
            }
        );
        assert_eq!(answer.chunks_used, 1);
        assert_eq!(answer.sources[0].label, "p1");

        let prompt = llm.last_prompt();
        assert_eq!(prompt[0].content, PATIENT_SYSTEM_PROMPT);
        assert!(prompt[1].content.contains("Letrozole"));
        assert!(!prompt[1].content.contains("Metformin"));
    }

    #[test]
    fn general_mode_uses_document_corpus() {
        let llm = MockLlm::new("Check the wound.");
        let embedder = CountingEmbedder::new();
        let router = FixedRouter("{}");
        let (store, roster) = (store(), roster());
        let pipeline = ChatPipeline::new(&llm, &embedder, &store, &router, &roster, 6);

        let answer = pipeline
            .answer(&request("Postoperative fever?", QueryMode::General, None))
            .unwrap();

        assert_eq!(answer.route, AnswerRoute::GeneralDocuments);
        assert!(answer.analysis.is_none());
        assert_eq!(llm.last_prompt()[0].content, GENERAL_SYSTEM_PROMPT);
    }

    #[test]
    fn auto_mode_general_question() {
        let llm = MockLlm::new("ok");
        let embedder = CountingEmbedder::new();
        let router = FixedRouter(r#"{"intent":"general","patient_reference":null,"confidence":0.9}"#);
        let (store, roster) = (store(), roster());
        let pipeline = ChatPipeline::new(&llm, &embedder, &store, &router, &roster, 6);

        let answer = pipeline
            .answer(&request("Explain hypertension", QueryMode::Auto, None))
            .unwrap();

        assert_eq!(answer.route, AnswerRoute::GeneralDocuments);
        assert_eq!(answer.analysis.unwrap().intent, RouteIntent::General);
    }

    #[test]
    fn auto_mode_pronoun_uses_locked_patient() {
        let llm = MockLlm::new("ok");
        let embedder = CountingEmbedder::new();
        let router = FixedRouter(r#"{"intent":"patient_specific","patient_reference":null}"#);
        let (store, roster) = (store(), roster());
        let pipeline = ChatPipeline::new(&llm, &embedder, &store, &router, &roster, 6);

        let locked = patient("IVF002", "Alex", "Morgan");
        let answer = pipeline
            .answer(&request("His meds?", QueryMode::Auto, Some(locked)))
            .unwrap();

        assert_eq!(
            answer.route,
            AnswerRoute::PatientRecords {
                patient_id: "IVF002".into()
            }
        );
    }

    #[test]
    fn auto_mode_never_unlocks_unverified_patient() {
        let llm = MockLlm::new("must not be called");
        let embedder = CountingEmbedder::new();
        let router = FixedRouter(r#"{"intent":"patient_specific","patient_reference":"Alex Morgan"}"#);
        let (store, roster) = (store(), roster());
        let pipeline = ChatPipeline::new(&llm, &embedder, &store, &router, &roster, 6);

        let locked = patient("IVF001", "Priya", "Sharma");
        let answer = pipeline
            .answer(&request("Alex Morgan's meds?", QueryMode::Auto, Some(locked)))
            .unwrap();

        assert_eq!(answer.route, AnswerRoute::NoRetrieval);
        assert!(answer.text.contains("IVF002"));
        assert!(!answer.text.contains("1985-06-01"));
        assert_eq!(llm.calls(), 0);
        assert_eq!(embedder.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn auto_mode_named_locked_patient_is_answered() {
        let llm = MockLlm::new("ok");
        let embedder = CountingEmbedder::new();
        let router = FixedRouter(r#"{"intent":"patient_specific","patient_reference":"IVF001"}"#);
        let (store, roster) = (store(), roster());
        let pipeline = ChatPipeline::new(&llm, &embedder, &store, &router, &roster, 6);

        let locked = patient("IVF001", "Priya", "Sharma");
        let answer = pipeline
            .answer(&request("IVF001 labs?", QueryMode::Auto, Some(locked)))
            .unwrap();

        assert_eq!(
            answer.route,
            AnswerRoute::PatientRecords {
                patient_id: "IVF001".into()
            }
        );
    }

    #[test]
    fn auto_mode_ambiguous_reference_lists_candidates() {
        let llm = MockLlm::new("unused");
        let embedder = CountingEmbedder::new();
        let router = FixedRouter(r#"{"intent":"patient_specific","patient_reference":"Sharma"}"#);
        let (store, roster) = (store(), roster());
        let pipeline = ChatPipeline::new(&llm, &embedder, &store, &router, &roster, 6);

        let answer = pipeline
            .answer(&request("Sharma's labs?", QueryMode::Auto, None))
            .unwrap();

        assert_eq!(answer.route, AnswerRoute::NoRetrieval);
        assert!(answer.text.contains("IVF001"));
        assert!(answer.text.contains("CARD100"));
    }

    #[test]
    fn auto_mode_unknown_patient_is_reported() {
        let llm = MockLlm::new("unused");
        let embedder = CountingEmbedder::new();
        let router =
            FixedRouter(r#"{"intent":"patient_specific","patient_reference":"Zebulon Quartermaine"}"#);
        let (store, roster) = (store(), roster());
        let pipeline = ChatPipeline::new(&llm, &embedder, &store, &router, &roster, 6);

        let answer = pipeline
            .answer(&request("Zebulon's MRI?", QueryMode::Auto, None))
            .unwrap();

        assert_eq!(answer.route, AnswerRoute::NoRetrieval);
        assert!(answer.text.contains("Zebulon Quartermaine"));
        assert_eq!(
            answer.analysis.unwrap().intent,
            RouteIntent::PatientSpecificNotFound
        );
    }

    #[test]
    fn auto_mode_without_lock_or_reference_explains() {
        let llm = MockLlm::new("unused");
        let embedder = CountingEmbedder::new();
        let router = FixedRouter(r#"{"intent":"patient_specific"}"#);
        let (store, roster) = (store(), roster());
        let pipeline = ChatPipeline::new(&llm, &embedder, &store, &router, &roster, 6);

        let answer = pipeline
            .answer(&request("Her vitals?", QueryMode::Auto, None))
            .unwrap();
        assert_eq!(answer.text, NO_PATIENT_CONTEXT_REPLY);
    }

    #[test]
    fn streaming_forwards_tokens_and_returns_full_text() {
        let llm = WordStreamingLlm;
        let embedder = CountingEmbedder::new();
        let router = FixedRouter("{}");
        let (store, roster) = (store(), roster());
        let pipeline = ChatPipeline::new(&llm, &embedder, &store, &router, &roster, 6);

        let (tx, rx) = std::sync::mpsc::channel();
        let locked = patient("IVF001", "Priya", "Sharma");
        let answer = pipeline
            .answer_streaming(
                &request("Meds?", QueryMode::PatientSpecific, Some(locked)),
                tx,
            )
            .unwrap();

        let tokens: Vec<String> = rx.try_iter().collect();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens.concat(), answer.text);
    }

    #[test]
    fn streaming_fixed_reply_is_one_token() {
        let llm = MockLlm::new("unused");
        let embedder = CountingEmbedder::new();
        let router = FixedRouter("{}");
        let (store, roster) = (store(), roster());
        let pipeline = ChatPipeline::new(&llm, &embedder, &store, &router, &roster, 6);

        let (tx, rx) = std::sync::mpsc::channel();
        pipeline
            .answer_streaming(&request("Meds?", QueryMode::PatientSpecific, None), tx)
            .unwrap();
        let tokens: Vec<String> = rx.try_iter().collect();
        assert_eq!(tokens, vec![LOCK_REQUIRED_REPLY.to_string()]);
    }
}
