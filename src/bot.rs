//! The key-desk dialog: issue, list, and revoke VPN keys

use crate::dialog::{DefinitionError, DialogError, StateMachine};
use crate::inventory::ServerKind;
use crate::keys::{KeyBackend, KeyError, UserKey};
use crate::session::{ChatEvent, ChatMeta, ChatUser, Keyboard, OutgoingMessage, SessionContext};
use futures::future::BoxFuture;
use std::sync::Arc;

pub type ChatSession = SessionContext<ChatEvent, ChatMeta>;

const NEW_KEY: &str = "New key";
const MY_KEYS: &str = "My keys";
const MAIN_MENU: &str = "🏠 Main menu";
const DELETE_KEY: &str = "🗑️ Delete a key";
const AMNEZIA: &str = "Amnezia";
const OUTLINE: &str = "Outline";
const CANCEL: &str = "Cancel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyState {
    Root,
    Start,
    MyKeys,
    DeleteKey,
    NewKey,
    Amnezia,
    Outline,
}

/// Context the key dialog's handlers run against
pub struct KeyDialog {
    session: ChatSession,
    user: ChatUser,
    keys: Arc<dyn KeyBackend>,
}

impl KeyDialog {
    /// Wrap a fresh session; chats without a known sender cannot own keys
    pub fn new(session: ChatSession, keys: Arc<dyn KeyBackend>) -> Result<Self, DialogError> {
        let user = session
            .meta()
            .user
            .clone()
            .ok_or_else(|| DialogError::handler("chat has no sender to issue keys to"))?;
        Ok(Self {
            session: session.with_user_label(user.display_name()),
            user,
            keys,
        })
    }

    /// Context factory for a [`crate::session::DialogWorker`]
    pub fn factory(
        keys: Arc<dyn KeyBackend>,
    ) -> impl Fn(ChatSession) -> Result<Self, DialogError> + Send + Sync + 'static {
        move |session| Self::new(session, Arc::clone(&keys))
    }

    /// Tell the user a key operation failed and go back to the menu
    async fn recover(&self, err: KeyError) -> Result<KeyState, DialogError> {
        tracing::warn!(user = %self.user.display_name(), error = %err, "key operation failed");
        let text = match err {
            KeyError::UnknownServer(_) => "Server not found".to_string(),
            KeyError::Unsupported(kind) => format!("{} is not supported", kind_label(kind)),
            KeyError::NotOwned { .. } => "Key not found".to_string(),
            _ => "Something went wrong, please try again later".to_string(),
        };
        self.session.send(text).await?;
        Ok(KeyState::Start)
    }

    async fn root(&mut self) -> Result<KeyState, DialogError> {
        self.session.send("Hello!").await?;
        Ok(KeyState::Start)
    }

    async fn start(&mut self) -> Result<KeyState, DialogError> {
        let menu = OutgoingMessage::text("Choose an action")
            .with_keyboard(Keyboard::new([[NEW_KEY, MY_KEYS]]));
        let choice = self.session.input(menu).await?;
        Ok(if choice == NEW_KEY {
            KeyState::NewKey
        } else {
            KeyState::MyKeys
        })
    }

    /// The user's keys; `None` once the user has been told why there are none
    async fn own_keys(&self) -> Result<Option<Vec<UserKey>>, DialogError> {
        match self.keys.list_user_keys(&self.user).await {
            Ok(keys) if keys.is_empty() => {
                self.session.send("You have no keys yet").await?;
                Ok(None)
            }
            Ok(keys) => Ok(Some(keys)),
            Err(err) => {
                self.recover(err).await?;
                Ok(None)
            }
        }
    }

    async fn my_keys(&mut self) -> Result<KeyState, DialogError> {
        let Some(keys) = self.own_keys().await? else {
            return Ok(KeyState::Start);
        };

        let listing: Vec<String> = keys.iter().map(describe_key).collect();
        let prompt = OutgoingMessage::text(format!("Your keys:\n{}", listing.join("\n\n")))
            .markdown()
            .with_keyboard(Keyboard::new([[MAIN_MENU, DELETE_KEY]]).resized());

        let choice = self.session.input(prompt).await?;
        Ok(if choice == MAIN_MENU {
            KeyState::Start
        } else {
            KeyState::DeleteKey
        })
    }

    async fn delete_key(&mut self) -> Result<KeyState, DialogError> {
        let Some(keys) = self.own_keys().await? else {
            return Ok(KeyState::Start);
        };

        let rows = std::iter::once(vec![MAIN_MENU.to_string()])
            .chain(keys.iter().map(|k| vec![picker_label(k)]));
        let prompt = OutgoingMessage::text("Which key?").with_keyboard(Keyboard::new(rows));

        let choice = self.session.input(prompt).await?;
        if choice == MAIN_MENU {
            return Ok(KeyState::Start);
        }
        let Some(picked) = keys.iter().find(|k| picker_label(k) == choice) else {
            return Err(DialogError::handler(format!("no key behind option {choice:?}")));
        };

        match self
            .keys
            .delete_key(&picked.server.name, &picked.key.id, &self.user)
            .await
        {
            Ok(()) => {
                self.session.send("Done").await?;
                Ok(KeyState::Start)
            }
            Err(err) => self.recover(err).await,
        }
    }

    async fn new_key(&mut self) -> Result<KeyState, DialogError> {
        let prompt = OutgoingMessage::text("Which protocol?")
            .with_keyboard(Keyboard::new([vec![AMNEZIA, OUTLINE], vec![CANCEL]]).resized());
        let choice = self.session.input(prompt).await?;
        Ok(match choice.as_str() {
            AMNEZIA => KeyState::Amnezia,
            OUTLINE => KeyState::Outline,
            _ => KeyState::Start,
        })
    }

    async fn amnezia(&mut self) -> Result<KeyState, DialogError> {
        self.session.send("Not supported yet").await?;
        Ok(KeyState::Start)
    }

    async fn outline(&mut self) -> Result<KeyState, DialogError> {
        let servers: Vec<String> = match self.keys.servers().await {
            Ok(servers) => servers
                .into_iter()
                .filter(|s| s.kind == ServerKind::Outline)
                .map(|s| s.name)
                .collect(),
            Err(err) => return self.recover(err).await,
        };
        if servers.is_empty() {
            self.session.send("No servers available right now").await?;
            return Ok(KeyState::Start);
        }

        let prompt = OutgoingMessage::text("Which server?")
            .with_keyboard(Keyboard::new(servers.iter().map(|name| [name.as_str()])));
        let choice = self.session.input(prompt).await?;

        match self.keys.create_key(&choice, &self.user).await {
            Ok(issued) => {
                let text = format!(
                    "Server {}\n```{}```",
                    issued.server.name, issued.key.access_url
                );
                self.session
                    .send(OutgoingMessage::text(text).markdown().remove_keyboard())
                    .await?;
                Ok(KeyState::Start)
            }
            Err(err) => self.recover(err).await,
        }
    }
}

fn kind_label(kind: ServerKind) -> &'static str {
    match kind {
        ServerKind::Outline => OUTLINE,
        ServerKind::Amnezia => AMNEZIA,
    }
}

fn describe_key(k: &UserKey) -> String {
    format!(
        "{}\n{} ({})\n```{}```",
        k.key.name, k.server.name, k.server.kind, k.key.access_url
    )
}

/// Button label identifying a key in the deletion picker
fn picker_label(k: &UserKey) -> String {
    format!("{}:{}:{}", k.server.name, k.key.id, k.key.name)
}

fn root(d: &mut KeyDialog) -> BoxFuture<'_, Result<KeyState, DialogError>> {
    Box::pin(d.root())
}

fn start(d: &mut KeyDialog) -> BoxFuture<'_, Result<KeyState, DialogError>> {
    Box::pin(d.start())
}

fn my_keys(d: &mut KeyDialog) -> BoxFuture<'_, Result<KeyState, DialogError>> {
    Box::pin(d.my_keys())
}

fn delete_key(d: &mut KeyDialog) -> BoxFuture<'_, Result<KeyState, DialogError>> {
    Box::pin(d.delete_key())
}

fn new_key(d: &mut KeyDialog) -> BoxFuture<'_, Result<KeyState, DialogError>> {
    Box::pin(d.new_key())
}

fn amnezia(d: &mut KeyDialog) -> BoxFuture<'_, Result<KeyState, DialogError>> {
    Box::pin(d.amnezia())
}

fn outline(d: &mut KeyDialog) -> BoxFuture<'_, Result<KeyState, DialogError>> {
    Box::pin(d.outline())
}

/// The key-desk dialog graph
pub fn key_dialog() -> Result<StateMachine<KeyState, KeyDialog>, DefinitionError> {
    StateMachine::builder(KeyState::Root)
        .state(KeyState::Root, [KeyState::Start], root)
        .state(KeyState::Start, [KeyState::MyKeys, KeyState::NewKey], start)
        .state(KeyState::MyKeys, [KeyState::Start, KeyState::DeleteKey], my_keys)
        .state(KeyState::DeleteKey, [KeyState::Start], delete_key)
        .state(
            KeyState::NewKey,
            [KeyState::Amnezia, KeyState::Outline, KeyState::Start],
            new_key,
        )
        .state(KeyState::Amnezia, [KeyState::Start], amnezia)
        .state(KeyState::Outline, [KeyState::Start], outline)
        .build()
}
