//! One conversational turn: user message in, streamed reply out, sentences
//! forwarded to the playback queue as they complete.

use std::sync::{Arc, Mutex, MutexGuard};

use audio_core::PlaybackQueue;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use genai_core::{ChatStream, ReplyStream};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::sentence::SentenceSplitter;

/// Transcript seeded into every fresh conversation.
pub const GREETING: &str = "### Bonjour !\n\nJe suis votre assistant juridique spécialisé en droit administratif.\n\nJe peux vous renseigner sur les thèmes suivants :\n- **Les actes administratifs unilatéraux**\n- **La police administrative**\n- **Le service public**\n\nQuelle est votre question ?";

/// Shown when the provider credential is absent.
pub const CONFIG_ERROR_MESSAGE: &str = "### Erreur de Configuration\n\nLa clé API est manquante. Veuillez configurer la variable d'environnement `GEMINI_API_KEY`.";

/// Shown when a turn fails, whether at request time or mid-stream.
pub const STREAM_ERROR_MESSAGE: &str = "### Erreur\n\nUne erreur est survenue lors de la consultation des documents.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Transcript change notifications, broadcast to every observer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageAppended { index: usize, message: Message },
    MessageUpdated { index: usize, text: String },
    Loading { active: bool },
    Playback { active: bool },
}

/// The two collaborators a configured conversation drives.
pub struct ChatBackend {
    pub generator: Arc<dyn ChatStream>,
    pub queue: PlaybackQueue,
}

/// Serial-turn conversation state machine.
///
/// `send` launches one turn on a background task; input while a turn is
/// loading is ignored, and a conversation with no backend answers every
/// attempt with the configuration-error message without contacting the
/// provider. Each turn owns a cancellation token: starting a new turn or
/// dropping the conversation cancels the previous one, so a superseded or
/// abandoned stream stops touching the transcript.
pub struct Conversation {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    events: broadcast::Sender<ChatEvent>,
    backend: Option<ChatBackend>,
}

struct State {
    messages: Vec<Message>,
    loading: bool,
    turn: CancellationToken,
}

impl Conversation {
    pub fn new(backend: Option<ChatBackend>) -> Self {
        let (events, _) = broadcast::channel(64);

        if let Some(backend) = &backend {
            let mut playing = backend.queue.playing();
            let events = events.clone();
            // Mirror the queue's playing flag onto the event stream. Ends
            // when the queue (and its watch sender) is dropped.
            tokio::spawn(async move {
                while playing.changed().await.is_ok() {
                    let active = *playing.borrow_and_update();
                    let _ = events.send(ChatEvent::Playback { active });
                }
            });
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                messages: Vec::new(),
                loading: false,
                turn: CancellationToken::new(),
            }),
            events,
            backend,
        });
        {
            let mut state = lock(&shared.state);
            shared.push_message(&mut state, Message::new(Role::Model, GREETING));
        }
        Self { shared }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.shared.events.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.shared.state).messages.clone()
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.shared.state).loading
    }

    /// Launch one turn: append the user message, then stream the reply into
    /// a growing model message on a background task, feeding completed
    /// sentences to playback. Blank input and input during an active turn
    /// are ignored.
    pub fn send(&self, input: &str) {
        let input = input.trim();
        if input.is_empty() {
            return;
        }

        let turn = {
            let mut state = lock(&self.shared.state);
            if state.loading {
                debug!("ignoring input during an active turn");
                return;
            }
            if self.shared.backend.is_none() {
                self.shared
                    .push_message(&mut state, Message::new(Role::Model, CONFIG_ERROR_MESSAGE));
                return;
            }
            // Supersede the previous turn before its audio tail plays into
            // this one.
            state.turn.cancel();
            state.turn = CancellationToken::new();
            let turn = state.turn.clone();
            if let Some(backend) = &self.shared.backend {
                backend.queue.reset();
            }
            self.shared
                .push_message(&mut state, Message::new(Role::User, input));
            self.shared.set_loading(&mut state, true);
            turn
        };

        tokio::spawn(run_turn(Arc::clone(&self.shared), turn, input.to_string()));
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        // Client gone: stop the in-flight turn and silence its audio.
        lock(&self.shared.state).turn.cancel();
        if let Some(backend) = &self.shared.backend {
            backend.queue.reset();
        }
    }
}

impl Shared {
    fn push_message(&self, state: &mut State, message: Message) -> usize {
        state.messages.push(message.clone());
        let index = state.messages.len() - 1;
        let _ = self.events.send(ChatEvent::MessageAppended { index, message });
        index
    }

    fn update_message(&self, state: &mut State, index: usize, text: &str) {
        if let Some(message) = state.messages.get_mut(index) {
            message.text = text.to_string();
            let _ = self.events.send(ChatEvent::MessageUpdated {
                index,
                text: text.to_string(),
            });
        }
    }

    fn set_loading(&self, state: &mut State, active: bool) {
        state.loading = active;
        let _ = self.events.send(ChatEvent::Loading { active });
    }

    fn enqueue_sentence(&self, sentence: String) {
        if let Some(backend) = &self.backend {
            backend.queue.enqueue(sentence);
        }
    }

    fn fail_turn(&self, turn: &CancellationToken) {
        if turn.is_cancelled() {
            return;
        }
        let mut state = lock(&self.state);
        self.push_message(&mut state, Message::new(Role::Model, STREAM_ERROR_MESSAGE));
        self.set_loading(&mut state, false);
    }
}

async fn run_turn(shared: Arc<Shared>, turn: CancellationToken, prompt: String) {
    let Some(backend) = shared.backend.as_ref() else {
        return;
    };

    let stream = match backend.generator.stream_reply(&prompt).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("reply request failed: {e:#}");
            shared.fail_turn(&turn);
            return;
        }
    };

    consume_stream(&shared, &turn, stream).await;
}

async fn consume_stream(shared: &Shared, turn: &CancellationToken, mut stream: ReplyStream) {
    if turn.is_cancelled() {
        return;
    }
    let index = {
        let mut state = lock(&shared.state);
        shared.push_message(&mut state, Message::new(Role::Model, ""))
    };
    let mut full_text = String::new();
    let mut splitter = SentenceSplitter::new();

    loop {
        let fragment = tokio::select! {
            _ = turn.cancelled() => {
                debug!("turn superseded or abandoned, dropping remaining fragments");
                return;
            }
            fragment = stream.next() => fragment,
        };
        let Some(fragment) = fragment else { break };
        let fragment = match fragment {
            Ok(fragment) => fragment,
            Err(e) => {
                warn!("reply stream failed mid-flight: {e:#}");
                shared.fail_turn(turn);
                return;
            }
        };
        full_text.push_str(&fragment);
        {
            let mut state = lock(&shared.state);
            shared.update_message(&mut state, index, &full_text);
        }
        for sentence in splitter.push(&fragment) {
            shared.enqueue_sentence(sentence);
        }
    }

    if turn.is_cancelled() {
        return;
    }
    if let Some(rest) = splitter.flush() {
        shared.enqueue_sentence(rest);
    }
    let mut state = lock(&shared.state);
    shared.set_loading(&mut state, false);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
