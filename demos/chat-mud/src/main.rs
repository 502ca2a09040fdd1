use std::collections::HashMap;

use lineforge::prelude::*;

const BANNER: &str = "\r\nWelcome to the Lantern Room.\r\n\r\n";
const HELP: &str = "Commands: say <text> (or '<text>), emote <text>, who, quit\r\n";

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

/// Greets new connections and moves them into the login prompt.
struct Greeter;

impl Lifecycle for Greeter {
    fn transition(
        &mut self,
        registry: &mut SessionRegistry,
        id: &ConnectionId,
        state: &SessionState,
    ) -> Result<(), HookError> {
        if *state == SessionState::Connecting {
            registry.write(id, BANNER)?;
            registry.set_prompt(id, "By what name are you known? ")?;
            registry.redraw(id)?;
            registry.transition(id, SessionState::Authenticating)?;
        }
        Ok(())
    }

    // The chat has no modal screens.
    fn handle_modal_input(
        &mut self,
        _registry: &mut SessionRegistry,
        _id: &ConnectionId,
        _key: Key,
    ) -> Result<(), HookError> {
        Ok(())
    }
}

fn valid_name(name: &str) -> bool {
    (2..=16).contains(&name.len()) && name.chars().all(|c| c.is_ascii_alphanumeric())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Runs the name/password exchange, then the chat commands.
#[derive(Default)]
struct Chat {
    /// Names chosen by sessions still at the password prompt.
    pending: HashMap<ConnectionId, String>,
}

impl Chat {
    fn login_line(
        &mut self,
        registry: &mut SessionRegistry,
        id: &ConnectionId,
        line: &str,
    ) -> Result<(), HookError> {
        let Some(name) = self.pending.remove(id) else {
            let name = line.trim();
            if !valid_name(name) {
                registry.write(id, "Names are 2 to 16 letters or digits.\r\n")?;
                return registry.redraw(id).map_err(Into::into);
            }
            self.pending.insert(id.clone(), name.to_string());
            registry.set_masked(id, true)?;
            registry.set_prompt(id, "Password: ")?;
            return registry.redraw(id).map_err(Into::into);
        };

        registry.set_masked(id, false)?;
        if line.is_empty() {
            registry.write(id, "A password is required.\r\n")?;
            registry.set_prompt(id, "By what name are you known? ")?;
            return registry.redraw(id).map_err(Into::into);
        }

        registry.authenticate(id, &name)?;
        tracing::info!(conn_id = %id, username = %name, "logged in");
        registry.write(id, &format!("Hello, {name}. {HELP}"))?;
        registry.set_prompt(id, "> ")?;
        registry.redraw(id)?;
        registry.broadcast(&format!("{name} has arrived."), Some(id));
        Ok(())
    }

    fn command(
        &mut self,
        registry: &mut SessionRegistry,
        id: &ConnectionId,
        name: &str,
        line: &str,
    ) -> Result<(), HookError> {
        let line = line.trim();
        let (verb, rest) = match line.strip_prefix('\'') {
            Some(rest) => ("say", rest.trim()),
            None => line.split_once(' ').unwrap_or((line, "")),
        };

        match verb.to_ascii_lowercase().as_str() {
            "" => {}
            "say" if !rest.is_empty() => {
                registry.broadcast(&format!("{name} says, \"{}\"", rest.trim()), None);
                return Ok(());
            }
            "emote" if !rest.is_empty() => {
                registry.broadcast(&format!("{name} {}", rest.trim()), None);
                return Ok(());
            }
            "who" => {
                let online = registry.online_users();
                registry.write(
                    id,
                    &format!("Online ({}): {}\r\n", online.len(), online.join(", ")),
                )?;
            }
            "help" => registry.write(id, HELP)?,
            "quit" => {
                registry.kick(id, "Farewell.\r\n")?;
                return Ok(());
            }
            _ => registry.write(id, "Huh?\r\n")?,
        }
        registry.redraw(id).map_err(Into::into)
    }
}

impl LineHandler for Chat {
    fn on_line(
        &mut self,
        registry: &mut SessionRegistry,
        id: &ConnectionId,
        line: &str,
    ) -> Result<(), HookError> {
        self.pending.retain(|pending, _| registry.contains(pending));

        let user = registry
            .get(id)
            .filter(|s| s.is_authenticated())
            .and_then(|s| s.user().map(str::to_owned));
        match user {
            Some(name) => self.command(registry, id, &name, line),
            None => self.login_line(registry, id, line),
        }
    }

    fn on_interrupt(
        &mut self,
        registry: &mut SessionRegistry,
        id: &ConnectionId,
    ) -> Result<(), HookError> {
        registry.write(id, "^C\r\n")?;
        registry.redraw(id).map_err(Into::into)
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info");

    let config = ServerConfig::from_env();
    let mut registry =
        SessionRegistry::new(config.registry.clone(), MemoryUserStore::new(), NullWorld);
    registry.install(Greeter, Chat::default());

    let server = LineforgeServer::builder().config(config).build(registry).await?;
    let telnet = server.telnet_addr()?;
    tracing::info!(%telnet, "chat-mud listening");
    if let Some(addr) = server.websocket_addr() {
        let websocket = addr?;
        tracing::info!(%websocket, "chat-mud listening");
    }

    server.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineforge::transport::{TestConnection, TestHandle};

    fn registry() -> SessionRegistry {
        let mut registry =
            SessionRegistry::new(RegistryConfig::default(), MemoryUserStore::new(), NullWorld);
        registry.install(Greeter, Chat::default());
        registry
    }

    fn connect(registry: &mut SessionRegistry, id: &str) -> (ConnectionId, TestHandle) {
        let (conn, handle) = TestConnection::new(id);
        let id = registry.create(Box::new(conn)).unwrap();
        (id, handle)
    }

    fn login(registry: &mut SessionRegistry, id: &str, name: &str) -> (ConnectionId, TestHandle) {
        let (id, handle) = connect(registry, id);
        registry.simulate_input(&id, &format!("{name}\r"));
        registry.simulate_input(&id, "secret\r");
        handle.take_output();
        (id, handle)
    }

    #[test]
    fn test_connect_shows_banner_and_name_prompt() {
        let mut registry = registry();
        let (id, handle) = connect(&mut registry, "c1");
        let out = handle.output();
        assert!(out.contains("Lantern Room"));
        assert!(out.ends_with("By what name are you known? "));
        assert_eq!(registry.get(&id).unwrap().state(), &SessionState::Authenticating);
    }

    #[test]
    fn test_password_is_masked_then_login_completes() {
        let mut registry = registry();
        let (id, handle) = connect(&mut registry, "c1");
        registry.simulate_input(&id, "alice\r");
        assert!(handle.is_masked());

        handle.take_output();
        registry.simulate_input(&id, "pw\r");
        let out = handle.output();
        assert!(out.starts_with("**"), "password echoes as stars: {out:?}");
        assert!(out.contains("Hello, alice."));
        assert!(!handle.is_masked());
        assert_eq!(registry.online_users(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_invalid_name_is_rejected() {
        let mut registry = registry();
        let (id, handle) = connect(&mut registry, "c1");
        registry.simulate_input(&id, "no spaces allowed\r");
        assert!(handle.output().contains("2 to 16"));
        assert!(!handle.is_masked());
    }

    #[test]
    fn test_say_reaches_everyone() {
        let mut registry = registry();
        let (alice, a) = login(&mut registry, "c1", "alice");
        let (_bob, b) = login(&mut registry, "c2", "bob");
        a.take_output();

        registry.simulate_input(&alice, "'hi there\r");
        assert!(a.output().contains("alice says, \"hi there\""));
        assert!(b.output().contains("alice says, \"hi there\""));
    }

    #[test]
    fn test_arrival_is_announced_to_others() {
        let mut registry = registry();
        let (_alice, a) = login(&mut registry, "c1", "alice");
        let (_bob, b) = login(&mut registry, "c2", "bob");
        assert!(a.output().contains("bob has arrived."));
        assert!(!b.output().contains("bob has arrived."));
    }

    #[test]
    fn test_who_lists_online_users() {
        let mut registry = registry();
        let (alice, a) = login(&mut registry, "c1", "alice");
        login(&mut registry, "c2", "bob");
        a.take_output();

        registry.simulate_input(&alice, "who\r");
        assert!(a.output().contains("Online (2): alice, bob"));
    }

    #[test]
    fn test_quit_closes_the_session() {
        let mut registry = registry();
        let (alice, a) = login(&mut registry, "c1", "alice");
        let (_bob, b) = login(&mut registry, "c2", "bob");

        registry.simulate_input(&alice, "quit\r");
        assert!(a.is_ended());
        assert!(a.output().contains("Farewell."));
        assert!(b.output().contains("alice has left."));
        assert!(!registry.contains(&alice));
    }
}
