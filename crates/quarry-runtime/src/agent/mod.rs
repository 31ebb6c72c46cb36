pub mod progress;
pub mod prompt;
pub mod session;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::directives::{self, ParsedDirectives, SearchRequest};
use crate::llm::{GenerateConfig, LLMProvider, Message, Role, Usage};
use crate::retrieval::Retriever;
use crate::thread_cache::ThreadContextCache;
use crate::tools::{RetrieveOutcome, ToolExecutor, DEFAULT_SEARCH_LIMIT};

use self::progress::{NullSink, ProgressSink, ProgressUpdate};
use self::prompt::HistoryMessage;
use self::session::{SessionState, SuspendedSession};

pub const MODEL_FAILURE_MESSAGE: &str =
    "Sorry, I couldn't reach the language model just now. Please try again in a moment.";
pub const TURN_LIMIT_MESSAGE: &str =
    "I reached my thinking limit before I could finish an answer. You can ask me to continue, or rephrase the question.";
pub const AWAITING_USER_MESSAGE: &str =
    "I need a bit more information before I can answer. Could you clarify what you are looking for?";
pub const END_SESSION_MESSAGE: &str =
    "I've finished looking into this. Let me know if you have any other questions.";

// ============================================================================
// AgentConfig
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Model invocations per session (and per continuation)
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// SEARCH result count when the directive gives no limit
    #[serde(default = "default_search_limit")]
    pub default_search_limit: usize,
    /// Results in the first prompt's context block
    #[serde(default = "default_initial_results")]
    pub initial_results: usize,
    #[serde(default = "default_initial_context_chars")]
    pub initial_context_chars: usize,
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// LLM model override (empty = use provider default)
    #[serde(default)]
    pub model: String,
}

fn default_system_prompt() -> String {
    prompt::DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_max_turns() -> usize {
    5
}
fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}
fn default_initial_results() -> usize {
    5
}
fn default_initial_context_chars() -> usize {
    8000
}
fn default_history_messages() -> usize {
    5
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_turns: default_max_turns(),
            default_search_limit: default_search_limit(),
            initial_results: default_initial_results(),
            initial_context_chars: default_initial_context_chars(),
            history_messages: default_history_messages(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            model: String::new(),
        }
    }
}

// ============================================================================
// Requests and outcomes
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<HistoryMessage>) -> Self {
        self.history = history;
        self
    }
}

/// Why a session stopped. Exactly one per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Response given with no further tool requests
    Completed,
    /// The model wrote the end-of-session marker
    EndSession,
    /// The model wrote the awaiting-user marker
    AwaitingUser,
    /// Ran out of turns
    TurnLimit,
    /// The model call failed or came back empty
    ModelFailure,
}

impl TerminationReason {
    /// The agent chose to stop
    pub fn is_normal(self) -> bool {
        matches!(self, TerminationReason::Completed | TerminationReason::EndSession)
    }

    /// Whether the session can be continued with more turns
    pub fn is_resumable(self) -> bool {
        matches!(self, TerminationReason::TurnLimit | TerminationReason::EndSession)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    /// Most recent response block, or the fallback message when there was none
    pub answer: String,
    /// Every response block, in order
    pub responses: Vec<String>,
    pub termination: TerminationReason,
    /// Model invocations in this run
    pub turns: usize,
    pub hit_turn_limit: bool,
    /// Documents retrieved in full during this run
    pub retrieved: Vec<String>,
    pub usage: Usage,
    /// Present when the session can be continued
    #[serde(skip)]
    pub resume: Option<SuspendedSession>,
}

// ============================================================================
// Agent
// ============================================================================

/// Retrieval agent: seed context → model → directives → tools → repeat.
///
/// Holds no per-session state, so one instance serves concurrent sessions.
pub struct Agent {
    config: AgentConfig,
    provider: Arc<dyn LLMProvider>,
    tools: ToolExecutor,
    thread_cache: Option<Arc<ThreadContextCache>>,
}

impl Agent {
    pub fn new(config: AgentConfig, provider: Arc<dyn LLMProvider>, retriever: Arc<Retriever>) -> Self {
        let tools = ToolExecutor::new(retriever).with_default_search_limit(config.default_search_limit);
        Self {
            config,
            provider,
            tools,
            thread_cache: None,
        }
    }

    pub fn with_thread_cache(mut self, cache: Arc<ThreadContextCache>) -> Self {
        self.thread_cache = Some(cache);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        self.tools.retriever()
    }

    pub fn thread_cache(&self) -> Option<&Arc<ThreadContextCache>> {
        self.thread_cache.as_ref()
    }

    /// Run a session and return only the outcome
    pub async fn ask(&self, request: &QueryRequest) -> AgentOutcome {
        self.run(request, &NullSink).await
    }

    /// Run a session, streaming status and response updates to `sink`
    pub async fn run(&self, request: &QueryRequest, sink: &dyn ProgressSink) -> AgentOutcome {
        info!(thread_id = ?request.thread_id, "Session started");
        if let Err(e) = self.retriever().weights().reload() {
            warn!(error = %e, "Could not reload model weights, using in-memory values");
        }

        let mut state = SessionState::new(&request.query, request.thread_id.clone());
        sink.emit(ProgressUpdate::status("Searching the knowledge base")).await;
        let context = self.initial_context(&request.query, &mut state).await;

        let history = prompt::format_history(&request.history, self.config.history_messages);
        state.transcript.push(Message::user(prompt::seed_prompt(
            &self.config.system_prompt,
            self.config.max_turns,
            history.as_deref(),
            &request.query,
            &context,
        )));

        self.drive(state, sink).await
    }

    /// Continue a suspended session with a fresh set of turns
    pub async fn resume(&self, suspended: SuspendedSession, sink: &dyn ProgressSink) -> AgentOutcome {
        info!(thread_id = ?suspended.thread_id, turns_used = suspended.turns_used, "Session resumed");
        let mut state = suspended.into_state();
        let note = prompt::continuation(self.config.max_turns);
        match state.transcript.last_mut() {
            Some(last) if last.role == Role::User => last.text.push_str(&note),
            _ => state.transcript.push(Message::user(note)),
        }
        self.drive(state, sink).await
    }

    /// Context block for the seed prompt.
    ///
    /// A fresh thread-cache entry supplies full documents, which then count as
    /// already in context. Otherwise a normal ranked search is used.
    async fn initial_context(&self, query: &str, state: &mut SessionState) -> String {
        let retriever = self.retriever();

        if let (Some(cache), Some(thread_id)) = (&self.thread_cache, &state.thread_id) {
            if let Some(cached) = cache.lookup(thread_id) {
                let mut docs = Vec::with_capacity(cached.len());
                for id in &cached {
                    if let Some(text) = retriever.lookup(id).await {
                        docs.push((id.clone(), text));
                    }
                }
                if !docs.is_empty() {
                    let (block, ids) = retriever.format_context(&docs, self.config.initial_context_chars);
                    info!(thread_id = %thread_id, docs = ids.len(), "Using cached thread context");
                    state.context_ids.extend(ids);
                    return block;
                }
                debug!(thread_id = %thread_id, "Cached documents no longer indexed, searching");
            }
        }

        let (block, ids) = retriever
            .initial_context(query, self.config.initial_results, self.config.initial_context_chars)
            .await;
        for id in &ids {
            state.touch(id);
        }
        block
    }

    fn generate_config(&self) -> GenerateConfig {
        GenerateConfig {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system_prompt: None,
        }
    }

    /// The turn loop. At most `max_turns` model calls.
    async fn drive(&self, mut state: SessionState, sink: &dyn ProgressSink) -> AgentOutcome {
        let max_turns = self.config.max_turns;
        let gen_config = self.generate_config();
        let mut termination = TerminationReason::TurnLimit;
        let mut responded_last_turn = false;
        let mut turns = 0;

        for turn in 1..=max_turns {
            let number = state.turns_used + 1;
            let reply = match self.provider.generate(&state.transcript, &gen_config).await {
                Ok(reply) if !reply.is_empty() => reply,
                Ok(_) => {
                    warn!(turn = number, "Model returned an empty reply");
                    termination = TerminationReason::ModelFailure;
                    break;
                }
                Err(e) => {
                    warn!(turn = number, error = %e, "Model call failed");
                    termination = TerminationReason::ModelFailure;
                    break;
                }
            };
            turns += 1;
            state.turns_used += 1;
            state.usage += reply.usage.clone();
            info!(
                turn = number,
                model = %reply.model,
                input_tokens = reply.usage.input_tokens,
                output_tokens = reply.usage.output_tokens,
                "Model reply received"
            );

            let parsed = directives::parse(&reply.text);
            let fragments = self.dispatch(&parsed, &mut state, sink).await;
            state
                .transcript
                .push(Message::assistant(prompt::turn_reply(number, &reply.text)));
            state.transcript.push(Message::user(prompt::turn_requests(
                number,
                &fragments,
                max_turns - turn,
            )));

            let decided = decide_termination(&parsed, turn == max_turns);
            responded_last_turn = parsed.response.is_some();
            if let Some(response) = parsed.response {
                state.responses.push(response.clone());
                let hit_limit = decided == Some(TerminationReason::TurnLimit);
                sink.emit(ProgressUpdate::response(response, decided.is_some(), hit_limit))
                    .await;
            }

            if let Some(reason) = decided {
                termination = reason;
                break;
            }
        }

        let fallback = match termination {
            TerminationReason::ModelFailure => Some(MODEL_FAILURE_MESSAGE),
            _ if responded_last_turn => None,
            TerminationReason::TurnLimit => Some(TURN_LIMIT_MESSAGE),
            TerminationReason::AwaitingUser => Some(AWAITING_USER_MESSAGE),
            TerminationReason::EndSession => Some(END_SESSION_MESSAGE),
            TerminationReason::Completed => None,
        };
        let hit_turn_limit = termination == TerminationReason::TurnLimit;
        if let Some(text) = fallback {
            sink.emit(ProgressUpdate::response(text, true, hit_turn_limit)).await;
        }

        if termination != TerminationReason::ModelFailure {
            self.remember_thread(&state);
        }

        info!(
            termination = ?termination,
            turns,
            retrieved = state.retrieved.len(),
            tokens = state.usage.total(),
            "Session finished"
        );

        // same text the sink saw as final
        let answer = fallback
            .map(String::from)
            .or_else(|| state.responses.last().cloned())
            .unwrap_or_default();
        let resume = termination.is_resumable().then(|| state.suspend());

        AgentOutcome {
            answer,
            responses: state.responses,
            termination,
            turns,
            hit_turn_limit,
            retrieved: state.retrieved,
            usage: state.usage,
            resume,
        }
    }

    /// Execute a reply's directives: RETRIEVE, WEIGHT, SEARCH, TREE, in that
    /// order, so weights land before any search of the same turn.
    async fn dispatch(&self, parsed: &ParsedDirectives, state: &mut SessionState, sink: &dyn ProgressSink) -> String {
        let mut fragments = String::new();

        for path in &parsed.retrieves {
            sink.emit(ProgressUpdate::status(format!("Retrieving `{}`", path)))
                .await;
            let outcome = self.tools.retrieve(path, &mut state.context_ids).await;
            if matches!(outcome, RetrieveOutcome::Added(_)) {
                state.retrieved.push(path.clone());
                state.touch(path);
            }
            fragments.push_str(outcome.fragment());
        }

        if !parsed.weights.is_empty() || !parsed.malformed_weights.is_empty() {
            fragments.push_str(&self.tools.weight(&parsed.weights, &parsed.malformed_weights));
        }

        for request in &parsed.searches {
            let shown = match request {
                SearchRequest::Semantic { query, .. } | SearchRequest::Sql { query } => query,
            };
            sink.emit(ProgressUpdate::status(format!("Searching for `{}`", shown)))
                .await;
            fragments.push_str(&self.tools.search(request).await);
        }

        for dir in &parsed.trees {
            fragments.push_str(&self.tools.tree(dir).await);
        }

        fragments
    }

    fn remember_thread(&self, state: &SessionState) {
        let (Some(cache), Some(thread_id)) = (&self.thread_cache, &state.thread_id) else {
            return;
        };
        match cache.record(thread_id, &state.touched) {
            Ok(docs) => debug!(thread_id = %thread_id, docs = ?docs, "Thread context saved"),
            Err(e) => warn!(thread_id = %thread_id, error = %e, "Could not persist thread context"),
        }
    }
}

/// Termination check after a turn's directives ran, highest priority first.
fn decide_termination(parsed: &ParsedDirectives, last_turn: bool) -> Option<TerminationReason> {
    if !parsed.has_tool_directives() && parsed.response.is_some() {
        Some(TerminationReason::Completed)
    } else if parsed.await_user {
        Some(TerminationReason::AwaitingUser)
    } else if parsed.end_session {
        Some(TerminationReason::EndSession)
    } else if last_turn {
        Some(TerminationReason::TurnLimit)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::progress::{CollectingSink, ProgressKind};
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_response_only_completes_after_one_turn() {
        let llm = ScriptedLLM::new(["[BEGIN RESPONSE]\nIt fits lens models.\n[END RESPONSE]"]);
        let agent = fixture_agent(llm.clone(), AgentConfig::default());

        let outcome = agent.ask(&QueryRequest::new("what does fit do?")).await;
        assert_eq!(outcome.termination, TerminationReason::Completed);
        assert_eq!(outcome.turns, 1);
        assert_eq!(llm.calls(), 1);
        assert_eq!(outcome.answer, "It fits lens models.");
        assert!(!outcome.hit_turn_limit);
        assert!(outcome.resume.is_none());
    }

    #[tokio::test]
    async fn test_turn_bound_enforced() {
        let llm = ScriptedLLM::repeating("[SEARCH: model limit 2]");
        let config = AgentConfig {
            max_turns: 3,
            ..Default::default()
        };
        let agent = fixture_agent(llm.clone(), config);
        let sink = CollectingSink::new();

        let outcome = agent.run(&QueryRequest::new("loop"), &sink).await;
        assert_eq!(llm.calls(), 3);
        assert_eq!(outcome.termination, TerminationReason::TurnLimit);
        assert!(outcome.hit_turn_limit);
        assert_eq!(outcome.answer, TURN_LIMIT_MESSAGE);

        let finals: Vec<_> = sink.updates().into_iter().filter(|u| u.is_final).collect();
        assert_eq!(finals.len(), 1);
        assert!(finals[0].hit_turn_limit);
        assert!(outcome.resume.is_some());
    }

    #[tokio::test]
    async fn test_transcript_grows_two_entries_per_turn() {
        let llm = ScriptedLLM::new([
            "[TREE: lens]",
            "[SEARCH: guide limit 1]",
            "[BEGIN RESPONSE]done[END RESPONSE]",
        ]);
        let agent = fixture_agent(llm.clone(), AgentConfig::default());
        agent.ask(&QueryRequest::new("q")).await;

        let lens = llm.transcript_lengths();
        assert_eq!(lens, vec![1, 3, 5]);
        let last = llm.last_transcript();
        assert_eq!(last[1].role, Role::Assistant);
        assert!(last[1].text.starts_with("\n\nTURN 1:\n\n[TREE: lens]"));
        assert!(last[2].text.starts_with("\n\nTURN 1 REQUESTS:\n\nTREE: Listing for 'lens'"));
        assert!(last[4].text.contains("Search results:\nguide"));
    }

    #[tokio::test]
    async fn test_retrieve_is_idempotent_within_session() {
        let llm = ScriptedLLM::new([
            "[RETRIEVE: lens/fit/model.py]\n[RETRIEVE: lens/fit/model.py]",
            "[RETRIEVE: lens/fit/model.py]",
            "[BEGIN RESPONSE]ok[END RESPONSE]",
        ]);
        let agent = fixture_agent(llm.clone(), AgentConfig::default());
        let outcome = agent.ask(&QueryRequest::new("zzz")).await;

        assert_eq!(outcome.retrieved, vec!["lens/fit/model.py"]);
        let everything: String = llm.last_transcript().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(everything.matches("Retrieved file: lens/fit/model.py").count(), 1);
        assert_eq!(everything.matches(MODEL_PY).count(), 1);
    }

    #[tokio::test]
    async fn test_weight_applies_before_search_in_same_turn() {
        let llm = ScriptedLLM::new([
            "[SEARCH: fit limit 3]\n[WEIGHT: lens/fit/model.py 1.5]",
            "[BEGIN RESPONSE]ok[END RESPONSE]",
        ]);
        let agent = fixture_agent(llm.clone(), AgentConfig::default());
        agent.ask(&QueryRequest::new("zzz")).await;

        let requests = &llm.last_transcript()[2].text;
        let weight_at = requests.find("Model reweighting:").unwrap();
        let search_at = requests.find("Search results:").unwrap();
        assert!(weight_at < search_at);
        let block = requests
            .split("\n\nResult ")
            .find(|b| b.contains("File: lens/fit/model.py"))
            .unwrap();
        assert!(block.contains("Model weight: 1.500"));
        assert_eq!(agent.retriever().weights().get("lens/fit/model.py"), 1.5);
    }

    #[tokio::test]
    async fn test_model_failure_is_reported() {
        let llm = ScriptedLLM::new(["[SEARCH: fit limit 1]"]);
        let agent = fixture_agent(llm.clone(), AgentConfig::default());
        let sink = CollectingSink::new();

        let outcome = agent.run(&QueryRequest::new("q"), &sink).await;
        assert_eq!(outcome.termination, TerminationReason::ModelFailure);
        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.answer, MODEL_FAILURE_MESSAGE);
        assert!(outcome.resume.is_none());
        let responses = sink.responses();
        assert_eq!(responses.len(), 1);
        assert!(responses[0].is_final && !responses[0].hit_turn_limit);
    }

    #[tokio::test]
    async fn test_empty_reply_is_model_failure() {
        let llm = ScriptedLLM::new(["   "]);
        let agent = fixture_agent(llm, AgentConfig::default());
        let outcome = agent.ask(&QueryRequest::new("q")).await;
        assert_eq!(outcome.termination, TerminationReason::ModelFailure);
        assert_eq!(outcome.turns, 0);
    }

    #[tokio::test]
    async fn test_await_marker_without_response_uses_fallback() {
        let llm = ScriptedLLM::new(["Which version? [AWAIT]"]);
        let agent = fixture_agent(llm.clone(), AgentConfig::default());
        let outcome = agent.ask(&QueryRequest::new("q")).await;
        assert_eq!(outcome.termination, TerminationReason::AwaitingUser);
        assert_eq!(outcome.answer, AWAITING_USER_MESSAGE);
        assert!(!outcome.hit_turn_limit);
        assert!(outcome.resume.is_none());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_end_marker_with_tools_is_resumable() {
        let llm = ScriptedLLM::new(["[SEARCH: fit limit 1]\n[BEGIN RESPONSE]partial[END RESPONSE]\n[DONE]"]);
        let agent = fixture_agent(llm, AgentConfig::default());
        let outcome = agent.ask(&QueryRequest::new("q")).await;
        assert_eq!(outcome.termination, TerminationReason::EndSession);
        assert!(outcome.termination.is_normal());
        assert_eq!(outcome.answer, "partial");
        assert!(outcome.resume.is_some());
    }

    #[tokio::test]
    async fn test_only_terminal_response_is_final() {
        let llm = ScriptedLLM::new([
            "[SEARCH: fit limit 1]\n[BEGIN RESPONSE]Looking into it[END RESPONSE]",
            "[BEGIN RESPONSE]Here is the answer[END RESPONSE]",
        ]);
        let agent = fixture_agent(llm, AgentConfig::default());
        let sink = CollectingSink::new();
        let outcome = agent.run(&QueryRequest::new("q"), &sink).await;

        let responses = sink.responses();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].text, "Looking into it");
        assert!(!responses[0].is_final);
        assert!(responses[1].is_final);
        assert_eq!(outcome.responses.len(), 2);
        assert_eq!(outcome.answer, "Here is the answer");
        assert!(sink.updates().iter().any(|u| u.kind == ProgressKind::Status));
    }

    #[tokio::test]
    async fn test_answer_matches_final_update_after_model_failure() {
        let llm = ScriptedLLM::new(["[SEARCH: fit limit 1]\n[BEGIN RESPONSE]Looking into it[END RESPONSE]"]);
        let agent = fixture_agent(llm, AgentConfig::default());
        let sink = CollectingSink::new();
        let outcome = agent.run(&QueryRequest::new("q"), &sink).await;

        assert_eq!(outcome.termination, TerminationReason::ModelFailure);
        assert_eq!(outcome.answer, MODEL_FAILURE_MESSAGE);
        let finals: Vec<_> = sink.responses().into_iter().filter(|u| u.is_final).collect();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].text, outcome.answer);
        assert_eq!(outcome.responses, vec!["Looking into it".to_string()]);
    }

    #[tokio::test]
    async fn test_answer_matches_final_update_at_turn_limit() {
        let llm = ScriptedLLM::new([
            "[SEARCH: fit limit 1]\n[BEGIN RESPONSE]Looking into it[END RESPONSE]",
            "[TREE: lens]",
        ]);
        let config = AgentConfig {
            max_turns: 2,
            ..Default::default()
        };
        let agent = fixture_agent(llm, config);
        let sink = CollectingSink::new();
        let outcome = agent.run(&QueryRequest::new("q"), &sink).await;

        assert_eq!(outcome.termination, TerminationReason::TurnLimit);
        assert_eq!(outcome.answer, TURN_LIMIT_MESSAGE);
        let finals: Vec<_> = sink.responses().into_iter().filter(|u| u.is_final).collect();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].text, outcome.answer);
        assert!(finals[0].hit_turn_limit);
    }

    #[tokio::test]
    async fn test_huge_search_limit_is_capped() {
        let llm = ScriptedLLM::new([
            "[SEARCH: fit limit 400000000000000000]",
            "[BEGIN RESPONSE]ok[END RESPONSE]",
        ]);
        let agent = fixture_agent(llm.clone(), AgentConfig::default());
        let outcome = agent.ask(&QueryRequest::new("q")).await;

        assert_eq!(outcome.termination, TerminationReason::Completed);
        assert_eq!(outcome.answer, "ok");
        assert!(llm.last_transcript()[2].text.contains("Search results:\nfit"));
    }

    #[tokio::test]
    async fn test_thread_cache_reused_and_merged() {
        let llm = ScriptedLLM::new([
            "[RETRIEVE: x.md]\n[RETRIEVE: w.md]",
            "[BEGIN RESPONSE]ok[END RESPONSE]",
        ]);
        let cache = Arc::new(ThreadContextCache::in_memory(Default::default()));
        cache
            .record("thread-1", &["x.md".into(), "y.md".into(), "z.md".into()])
            .unwrap();
        let agent = fixture_agent(llm.clone(), AgentConfig::default()).with_thread_cache(cache.clone());

        let outcome = agent
            .ask(&QueryRequest::new("anything").with_thread("thread-1"))
            .await;

        // x.md came from the cache, so only w.md was actually retrieved
        assert_eq!(outcome.retrieved, vec!["w.md"]);
        assert!(llm.last_transcript()[0].text.contains("Document: x.md\nX marks the spot"));
        assert_eq!(
            cache.lookup("thread-1").unwrap(),
            vec!["y.md".to_string(), "z.md".to_string(), "w.md".to_string()]
        );
    }

    #[tokio::test]
    async fn test_fresh_search_ids_seed_thread_cache() {
        let llm = ScriptedLLM::new(["[BEGIN RESPONSE]ok[END RESPONSE]"]);
        let cache = Arc::new(ThreadContextCache::in_memory(Default::default()));
        let config = AgentConfig {
            initial_results: 1,
            ..Default::default()
        };
        let agent = fixture_agent(llm, config).with_thread_cache(cache.clone());
        agent
            .ask(&QueryRequest::new("guide").with_thread("t"))
            .await;
        assert_eq!(cache.lookup("t").unwrap(), vec!["lens/fit/docs/guide.md".to_string()]);
    }

    #[tokio::test]
    async fn test_resume_runs_fresh_turn_budget() {
        let llm = ScriptedLLM::new([
            "[RETRIEVE: lens/fit/model.py]",
            "[TREE: lens]",
            "[RETRIEVE: lens/fit/model.py]\n[BEGIN RESPONSE]final[END RESPONSE]\n[DONE]",
        ]);
        let config = AgentConfig {
            max_turns: 2,
            ..Default::default()
        };
        let agent = fixture_agent(llm.clone(), config);
        let first = agent.ask(&QueryRequest::new("q")).await;
        assert_eq!(first.termination, TerminationReason::TurnLimit);

        let suspended = first.resume.unwrap();
        assert_eq!(suspended.context_ids, vec!["lens/fit/model.py".to_string()]);
        let second = agent.resume(suspended, &NullSink).await;
        assert_eq!(second.termination, TerminationReason::EndSession);
        assert_eq!(second.turns, 1);
        assert!(second.retrieved.is_empty());
        let transcript = llm.last_transcript();
        assert!(transcript[4].text.contains("continue working on this question"));
    }

    #[tokio::test]
    async fn test_history_in_seed_prompt() {
        let llm = ScriptedLLM::new(["[BEGIN RESPONSE]ok[END RESPONSE]"]);
        let agent = fixture_agent(llm.clone(), AgentConfig::default());
        let request = QueryRequest::new("and then?").with_history(vec![
            HistoryMessage {
                text: "how do I fit?".into(),
                is_bot: false,
            },
            HistoryMessage {
                text: ":mag: _Searching for relevant information_".into(),
                is_bot: true,
            },
        ]);
        agent.ask(&request).await;
        let seed = &llm.last_transcript()[0].text;
        assert!(seed.contains("Recent conversation context:\nUser: how do I fit?\n"));
        assert!(!seed.contains("Searching for relevant"));
    }

    #[test]
    fn test_termination_priority() {
        let completed = directives::parse("[BEGIN RESPONSE]a[END RESPONSE][DONE]");
        assert_eq!(decide_termination(&completed, false), Some(TerminationReason::Completed));
        let both = directives::parse("[TREE: a]\n[AWAIT][DONE]");
        assert_eq!(decide_termination(&both, true), Some(TerminationReason::AwaitingUser));
        let tools = directives::parse("[TREE: a]");
        assert_eq!(decide_termination(&tools, false), None);
        assert_eq!(decide_termination(&tools, true), Some(TerminationReason::TurnLimit));
        let nothing = directives::parse("hmm");
        assert_eq!(decide_termination(&nothing, false), None);
    }
}
