//! Server driver: command table, dispatch guard, and every command handler.
//!
//! Ties together the per-connection [`Connection`] state machines, the
//! [`Registry`] of signed-on users and live groups, the [`CredentialStore`],
//! and the loaded [`Motd`]. Like [`Connection`] itself this is sans-IO: every
//! public method takes an event and returns [`ServerAction`]s for the
//! runtime in `lib.rs` to execute. Unlike `Connection`, handlers here may
//! suspend (credential store calls), so dispatch is `async`.

use std::collections::HashMap;
use std::sync::Arc;

use dcp_core::acl::{is_group_acl, is_user_acl};
use dcp_core::{Connection, DispatchError, Environment, SessionAction, SessionState, User};
use dcp_proto::{paginate, Dialect, Frame, KVal};

use crate::credentials::{crypt, AclRow, CredentialStore};
use crate::motd::Motd;
use crate::registry::Registry;

/// Static configuration the driver needs at dispatch time.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Appears as `=<name>` in source fields.
    pub server_name: String,
    /// If set, required as the `servpass` kval on `signon`/`register`.
    pub server_password: Option<String>,
    /// Wire dialect this server instance speaks.
    pub dialect: Dialect,
}

/// Actions the driver produces for the runtime to execute.
#[derive(Debug, Clone)]
pub enum ServerAction {
    /// Send `frame` to `session_id`.
    Send {
        /// Target session.
        session_id: u64,
        /// Frame to send.
        frame: Frame,
    },
    /// Close `session_id`'s transport.
    Close {
        /// Session to close.
        session_id: u64,
    },
    /// Emit a log line.
    Log {
        /// Severity.
        level: LogLevel,
        /// Message text.
        message: String,
    },
}

/// Severity for [`ServerAction::Log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Routine lifecycle event.
    Debug,
    /// Noteworthy but expected.
    Info,
    /// Recovered from a client error.
    Warn,
    /// Unexpected failure.
    Error,
}

/// Whether `name` requires the session to already be registered, or `None`
/// if `name` is not a known command.
///
/// This is the "static table of `{name → handler}`" the command dispatch
/// uses for its uniform registration guard; the handler bodies themselves
/// differ enough in shape (group ops vs ACL ops vs liveness) that they stay
/// a plain match in [`ServerDriver::dispatch`] rather than function
/// pointers in the table.
fn command_requires_registered(name: &str) -> Option<bool> {
    match name {
        "signon" | "register" => Some(false),
        "message" | "motd" | "whois" | "group_enter" | "group_exit" | "pong" | "acl_set"
        | "acl_del" | "acl_list" => Some(true),
        _ => None,
    }
}

/// Action-based server driver: command table, dispatch guard, and every
/// command handler.
pub struct ServerDriver<E: Environment, C: CredentialStore> {
    env: E,
    store: Arc<C>,
    motd: Arc<Motd>,
    config: ServerConfig,
    registry: Registry,
    connections: HashMap<u64, Connection<E::Instant>>,
}

impl<E, C> ServerDriver<E, C>
where
    E: Environment,
    E::Instant: std::ops::Add<std::time::Duration, Output = E::Instant>,
    C: CredentialStore,
{
    /// Create a new driver.
    pub fn new(env: E, store: Arc<C>, motd: Arc<Motd>, config: ServerConfig) -> Self {
        Self { env, store, motd, config, registry: Registry::new(), connections: HashMap::new() }
    }

    /// Read-only access to the registry, for diagnostics and tests.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode `frame` in `session_id`'s chosen dialect, for the runtime to
    /// write to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`dcp_proto::FrameError::Oversize`] if `frame` does not fit,
    /// or does nothing useful if the session is already gone (callers only
    /// reach this after an `accept`, so that should not happen in practice).
    pub fn encode(&self, session_id: u64, frame: &Frame) -> Option<Result<Vec<u8>, dcp_proto::FrameError>> {
        self.connections.get(&session_id).map(|conn| conn.encode(frame))
    }

    /// Accept a new connection, arming its signon timer.
    pub fn accept(&mut self, session_id: u64) -> Vec<ServerAction> {
        let now = self.env.now();
        self.connections.insert(session_id, Connection::new(now, self.config.dialect, &self.config.server_name));
        vec![ServerAction::Log {
            level: LogLevel::Debug,
            message: format!("session {session_id} accepted"),
        }]
    }

    /// Feed newly-arrived bytes into `session_id`'s connection and dispatch
    /// every complete frame extracted.
    pub async fn ingest(&mut self, session_id: u64, bytes: &[u8]) -> Vec<ServerAction> {
        let Some(conn) = self.connections.get_mut(&session_id) else { return Vec::new() };
        let outcome = conn.ingest(bytes);
        let mut actions = self.apply_session_actions(session_id, outcome.actions);

        for frame in outcome.frames {
            actions.extend(self.dispatch(session_id, frame).await);
        }

        actions
    }

    /// Run periodic maintenance (signon/ping timers) for every open
    /// connection.
    pub fn tick(&mut self) -> Vec<ServerAction> {
        let now = self.env.now();
        let session_ids: Vec<u64> = self.connections.keys().copied().collect();
        let mut actions = Vec::new();
        for session_id in session_ids {
            let Some(conn) = self.connections.get_mut(&session_id) else { continue };
            let session_actions = conn.tick(&self.env, now);
            actions.extend(self.apply_session_actions(session_id, session_actions));
        }
        actions
    }

    /// Tear down `session_id`: remove its user (if any), broadcast
    /// departures, and drop the connection.
    pub fn disconnect(&mut self, session_id: u64) -> Vec<ServerAction> {
        self.connections.remove(&session_id);
        self.remove_session_user(session_id)
    }

    fn remove_session_user(&mut self, session_id: u64) -> Vec<ServerAction> {
        let Some(handle) = self.registry.handle_for_session(session_id).map(str::to_string) else {
            return Vec::new();
        };
        let Some((_, departed_groups)) = self.registry.remove_user(&handle) else {
            return Vec::new();
        };

        let mut actions = Vec::new();
        for group in departed_groups {
            actions.extend(self.broadcast_to_group(&group, Frame::new(
                handle.clone(),
                group.clone(),
                "group-exit",
                KVal::new(),
            )));
        }
        actions
    }

    fn apply_session_actions(&mut self, session_id: u64, actions: Vec<SessionAction>) -> Vec<ServerAction> {
        let mut out = Vec::new();
        let mut should_close = false;
        for action in actions {
            match action {
                SessionAction::SendFrame(frame) => out.push(ServerAction::Send { session_id, frame }),
                SessionAction::Close => should_close = true,
            }
        }
        if should_close {
            out.extend(self.remove_session_user(session_id));
            self.connections.remove(&session_id);
            out.push(ServerAction::Close { session_id });
        }
        out
    }

    fn server_source(&self) -> String {
        format!("={}", self.config.server_name)
    }

    fn send_to(&self, session_id: u64, frame: Frame) -> ServerAction {
        ServerAction::Send { session_id, frame }
    }

    fn fail(&mut self, session_id: u64, command: &str, err: &DispatchError) -> Vec<ServerAction> {
        let Some(conn) = self.connections.get_mut(&session_id) else { return Vec::new() };
        let actions = conn.fail(command, err, &KVal::new());
        self.apply_session_actions(session_id, actions)
    }

    async fn dispatch(&mut self, session_id: u64, frame: Frame) -> Vec<ServerAction> {
        let handler_name = frame.handler_name();
        let Some(state) = self.connections.get(&session_id).map(Connection::state) else {
            return Vec::new();
        };

        let Some(requires_registered) = command_requires_registered(&handler_name) else {
            return self.fail(session_id, &frame.command, &DispatchError::NoSuchCommand);
        };

        match (state, requires_registered) {
            (SessionState::Connected, false) => self.dispatch_pre_registration(session_id, &handler_name, frame).await,
            (SessionState::Registered, true) => self.dispatch_post_registration(session_id, &handler_name, frame).await,
            (SessionState::Connected, true) => self.fail(session_id, &frame.command, &DispatchError::NotRegistered),
            (SessionState::Registered, false) => {
                self.fail(session_id, &frame.command, &DispatchError::AlreadyRegistered)
            },
            (SessionState::Closed, _) => Vec::new(),
        }
    }

    async fn dispatch_pre_registration(&mut self, session_id: u64, name: &str, frame: Frame) -> Vec<ServerAction> {
        match name {
            "signon" => self.handle_signon(session_id, &frame).await,
            "register" => self.handle_register(session_id, &frame).await,
            _ => unreachable!("command table only routes signon/register here"),
        }
    }

    async fn dispatch_post_registration(&mut self, session_id: u64, name: &str, frame: Frame) -> Vec<ServerAction> {
        let Some(handle) = self.registry.handle_for_session(session_id).map(str::to_string) else {
            return self.fail(session_id, &frame.command, &DispatchError::NotRegistered);
        };

        let result = match name {
            "message" => self.handle_message(&handle, &frame),
            "motd" => Ok(self.handle_motd(session_id)),
            "whois" => self.handle_whois(&handle, session_id, &frame),
            "group_enter" => self.handle_group_enter(&handle, &frame),
            "group_exit" => self.handle_group_exit(&handle, &frame),
            "pong" => {
                if let Some(conn) = self.connections.get_mut(&session_id) {
                    conn.handle_pong();
                }
                Ok(Vec::new())
            },
            "acl_set" => self.handle_acl_mutate(&handle, &frame, true),
            "acl_del" => self.handle_acl_mutate(&handle, &frame, false),
            "acl_list" => self.handle_acl_list(&handle, session_id, &frame).await,
            _ => unreachable!("command table only routes post-registration commands here"),
        };

        match result {
            Ok(actions) => actions,
            Err(err) => self.fail(session_id, &frame.command, &err),
        }
    }

    // --- signon / register -------------------------------------------------

    async fn handle_signon(&mut self, session_id: u64, frame: &Frame) -> Vec<ServerAction> {
        match self.validate_and_authenticate(frame).await {
            Ok((handle, record)) => self.complete_registration(session_id, handle, record.gecos, record.acls).await,
            Err(err) => self.fail(session_id, &frame.command, &err),
        }
    }

    async fn validate_and_authenticate(
        &self,
        frame: &Frame,
    ) -> Result<(String, crate::credentials::CredentialRecord), DispatchError> {
        let handle = validate_handle_kval(frame)?;

        if let Some(expected) = &self.config.server_password {
            if frame.first("servpass") != Some(expected.as_str()) {
                return Err(DispatchError::InvalidPassword);
            }
        }

        let record = self
            .store
            .get(&handle)
            .await
            .map_err(|_| DispatchError::Internal)?
            .ok_or(DispatchError::InvalidPassword)?;

        let password = frame.first("password").unwrap_or("");
        let computed = crypt(password, &record.hash);
        if !constant_time_eq(&computed, &record.hash) {
            return Err(DispatchError::InvalidPassword);
        }

        Ok((handle, record))
    }

    async fn handle_register(&mut self, session_id: u64, frame: &Frame) -> Vec<ServerAction> {
        match self.validate_and_create(frame).await {
            Ok((handle, gecos)) => {
                let echo = self.build_register_echo(&handle, &gecos);
                let mut actions = vec![self.send_to(session_id, echo)];
                actions.extend(self.complete_registration(session_id, handle, gecos, Vec::new()).await);
                actions
            },
            Err(err) => self.fail(session_id, &frame.command, &err),
        }
    }

    async fn validate_and_create(&self, frame: &Frame) -> Result<(String, String), DispatchError> {
        let handle = validate_handle_kval(frame)?;

        if let Some(expected) = &self.config.server_password {
            if frame.first("servpass") != Some(expected.as_str()) {
                return Err(DispatchError::InvalidPassword);
            }
        }

        if self.store.get(&handle).await.map_err(|_| DispatchError::Internal)?.is_some() {
            return Err(DispatchError::InvalidRegistration("Handle already registered".to_string()));
        }

        let password = frame.first("password").unwrap_or("");
        if password.len() < 5 {
            return Err(DispatchError::InvalidRegistration(
                "Registration password is too short".to_string(),
            ));
        }

        let gecos = frame.first("gecos").unwrap_or(&handle).to_string();
        let salt = format!("{:016x}", self.env.random_u64());
        let hash = crypt(password, &salt);
        self.store.add(&handle, &hash, &gecos, &[]).await.map_err(|_| DispatchError::Internal)?;

        Ok((handle, gecos))
    }

    fn build_register_echo(&self, handle: &str, gecos: &str) -> Frame {
        let mut kval = KVal::new();
        kval.insert("handle".to_string(), vec![handle.to_string()]);
        kval.insert("gecos".to_string(), vec![gecos.to_string()]);
        kval.insert("welcome".to_string(), vec![format!("Welcome, {handle}!")]);
        Frame::new(self.server_source(), handle, "register", kval)
    }

    async fn complete_registration(
        &mut self,
        session_id: u64,
        handle: String,
        gecos: String,
        acls: Vec<String>,
    ) -> Vec<ServerAction> {
        let mut user = User::new(&handle, gecos, session_id);
        let now_secs = self.env.wall_clock_secs();
        for token in acls {
            let _ = user.acl.add(&token, "*", now_secs);
        }

        if let Err(err) = self.registry.enter_user(user) {
            return self.fail(session_id, "signon", &err);
        }

        let now = self.env.now();
        let Some(conn) = self.connections.get_mut(&session_id) else { return Vec::new() };
        if let Err(err) = conn.enter_registered(&self.env, now) {
            return self.fail(session_id, "signon", &err);
        }

        let mut kval = KVal::new();
        kval.insert("name".to_string(), vec![self.config.server_name.clone()]);
        kval.insert("time".to_string(), vec![now_secs.to_string()]);
        kval.insert("version".to_string(), vec!["dcp".to_string(), env!("CARGO_PKG_VERSION").to_string()]);
        kval.insert("options".to_string(), Vec::new());
        let signon_frame = Frame::new(self.server_source(), handle, "signon", kval);

        let mut actions = vec![self.send_to(session_id, signon_frame)];
        actions.extend(self.handle_motd(session_id));
        actions
    }

    // --- message -------------------------------------------------------

    fn handle_message(&self, sender: &str, frame: &Frame) -> Result<Vec<ServerAction>, DispatchError> {
        let target = frame.target.as_str();

        if target == "*" {
            return Err(DispatchError::InvalidTarget("Invalid target".to_string()));
        }
        if target.starts_with('=') || target.starts_with('&') {
            return Err(DispatchError::ServersNotSupported);
        }

        let body = frame.kval.get("body").cloned().unwrap_or_default();
        let mut kval = KVal::new();
        kval.insert("body".to_string(), body);
        let out_frame = Frame::new(sender, target, "message", kval);

        if let Some(group_name) = target.strip_prefix('#').map(|_| target) {
            if self.registry.group(group_name).is_none() {
                return Err(DispatchError::NoSuchTarget);
            }
            return Ok(self.broadcast_to_group_except(group_name, sender, out_frame));
        }

        let recipient = self.registry.user(target).ok_or(DispatchError::NoSuchTarget)?;
        Ok(vec![self.send_to(recipient.session_id, out_frame)])
    }

    fn broadcast_to_group(&self, group_name: &str, frame: Frame) -> Vec<ServerAction> {
        self.registry
            .group_members(group_name)
            .into_iter()
            .filter_map(|member| self.registry.user(&member))
            .map(|user| self.send_to(user.session_id, frame.clone()))
            .collect()
    }

    fn broadcast_to_group_except(&self, group_name: &str, exclude: &str, frame: Frame) -> Vec<ServerAction> {
        self.registry
            .group_members(group_name)
            .into_iter()
            .filter(|member| member != exclude)
            .filter_map(|member| self.registry.user(&member))
            .map(|user| self.send_to(user.session_id, frame.clone()))
            .collect()
    }

    // --- motd ------------------------------------------------------------

    fn handle_motd(&self, session_id: u64) -> Vec<ServerAction> {
        if self.motd.lines().is_empty() {
            return vec![self.send_to(session_id, Frame::new(self.server_source(), "*", "motd", KVal::new()))];
        }

        let mut kval = KVal::new();
        kval.insert("text".to_string(), self.motd.lines().to_vec());
        paginate("motd", &kval, &["text"])
            .into_iter()
            .map(|part| self.send_to(session_id, Frame::new(self.server_source(), "*", "motd", part)))
            .collect()
    }

    // --- whois -------------------------------------------------------------

    fn handle_whois(
        &self,
        requester: &str,
        session_id: u64,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, DispatchError> {
        let target = frame.target.as_str();
        if target.is_empty() || target == "*" || target.starts_with('#') || target.starts_with('=') || target.starts_with('&')
        {
            return Err(DispatchError::InvalidTarget("Invalid target".to_string()));
        }
        let target_user = self.registry.user(target).ok_or(DispatchError::NoSuchTarget)?;

        let requester_is_auspex =
            self.registry.user(requester).is_some_and(|u| u.acl.has_acl("user:auspex"));

        let mut kval = KVal::new();
        kval.insert("handle".to_string(), vec![target_user.handle.clone()]);
        kval.insert("gecos".to_string(), vec![target_user.gecos.clone()]);
        if requester_is_auspex {
            let acl_tokens: Vec<String> = target_user.acl.entries().map(|(token, _)| token.to_string()).collect();
            kval.insert("acl".to_string(), acl_tokens);
            let groups: Vec<String> = target_user.groups.iter().cloned().collect();
            kval.insert("groups".to_string(), groups);
        }

        Ok(paginate("whois", &kval, &["acl", "groups"])
            .into_iter()
            .map(|part| self.send_to(session_id, Frame::new(self.server_source(), requester, "whois", part)))
            .collect())
    }

    // --- group-enter / group-exit -------------------------------------

    fn handle_group_enter(&mut self, handle: &str, frame: &Frame) -> Result<Vec<ServerAction>, DispatchError> {
        let group_name = frame.target.as_str();
        if !dcp_core::valid_group_name(group_name) {
            return Err(DispatchError::InvalidTarget("Invalid group name".to_string()));
        }

        self.registry.enter_group(handle, group_name)?;

        let mut kval = KVal::new();
        if let Some(reason) = frame.first("reason") {
            kval.insert("reason".to_string(), vec![reason.to_string()]);
        }
        let out_frame = Frame::new(handle, group_name, "group-enter", kval);
        Ok(self.broadcast_to_group(group_name, out_frame))
    }

    fn handle_group_exit(&mut self, handle: &str, frame: &Frame) -> Result<Vec<ServerAction>, DispatchError> {
        let group_name = frame.target.as_str();
        let members_before = self.registry.group_members(group_name);
        self.registry.exit_group(handle, group_name)?;

        let mut kval = KVal::new();
        if let Some(reason) = frame.first("reason") {
            kval.insert("reason".to_string(), vec![reason.to_string()]);
        }
        let out_frame = Frame::new(handle, group_name, "group-exit", kval);

        Ok(members_before
            .iter()
            .filter_map(|member| self.registry.user(member))
            .map(|user| self.send_to(user.session_id, out_frame.clone()))
            .collect())
    }

    // --- ACL operations -----------------------------------------------

    fn handle_acl_mutate(
        &mut self,
        requester: &str,
        frame: &Frame,
        granting: bool,
    ) -> Result<Vec<ServerAction>, DispatchError> {
        let target = frame.target.as_str();
        let token = frame.first("acl").ok_or(DispatchError::NoAcl)?.to_string();
        let now = self.env.wall_clock_secs();

        if let Some(group_name) = target.strip_prefix('#').map(|_| target) {
            if !is_group_acl(&token) {
                return Err(DispatchError::InvalidAcl);
            }
            let grantee = frame.first("user").ok_or(DispatchError::NoAclUser)?.to_string();
            self.authorize_group_mutation(requester, group_name, &token)?;

            let group = self.registry.group_mut(group_name).ok_or(DispatchError::NoSuchTarget)?;
            if !group.members.contains(&grantee) {
                return Err(DispatchError::NotAMember);
            }
            let acl_set = group.acl.entry(grantee.clone()).or_default();
            if granting {
                acl_set.add(&token, requester, now)?;
            } else {
                acl_set.remove(&token)?;
            }

            let mut confirm_kval = KVal::new();
            confirm_kval.insert("target".to_string(), vec![target.to_string()]);
            confirm_kval.insert("user".to_string(), vec![grantee.clone()]);
            confirm_kval.insert("acl".to_string(), vec![token]);
            let command = if granting { "acl-set" } else { "acl-del" };
            let confirm = Frame::new(self.server_source(), requester, command, confirm_kval.clone());
            let mut actions = vec![self.send_to_handle(requester, confirm)];
            actions.extend(self.send_to_handle(&grantee, Frame::new(self.server_source(), grantee.clone(), command, confirm_kval)));
            return Ok(actions);
        }

        if !is_user_acl(&token) {
            return Err(DispatchError::InvalidAcl);
        }
        let requester_user = self.registry.user(requester).ok_or(DispatchError::Internal)?;
        if !requester_user.acl.has_acl("user:grant") || !requester_user.acl.has_acl(&token) {
            return Err(DispatchError::NoGrant("No permission to alter ACL".to_string()));
        }

        let target_user = self.registry.user_mut(target).ok_or(DispatchError::NoSuchTarget)?;
        if granting {
            target_user.acl.add(&token, requester, now)?;
        } else {
            target_user.acl.remove(&token)?;
        }

        let mut confirm_kval = KVal::new();
        confirm_kval.insert("target".to_string(), vec![target.to_string()]);
        confirm_kval.insert("acl".to_string(), vec![token]);
        let command = if granting { "acl-set" } else { "acl-del" };
        let confirm = Frame::new(self.server_source(), requester, command, confirm_kval.clone());
        let mut actions = vec![self.send_to_handle(requester, confirm)];
        actions.extend(self.send_to_handle(target, Frame::new(self.server_source(), target.to_string(), command, confirm_kval)));
        Ok(actions)
    }

    fn authorize_group_mutation(
        &self,
        requester: &str,
        group_name: &str,
        token: &str,
    ) -> Result<(), DispatchError> {
        let group = self.registry.group(group_name).ok_or(DispatchError::NoSuchTarget)?;
        if !group.members.contains(requester) {
            return Err(DispatchError::NotAMember);
        }

        let holds_group_grant = group
            .acl
            .get(requester)
            .is_some_and(|set| set.has_acl("grant") || set.has_acl("grant:*") || set.has_acl(&format!("grant:{token}")));
        let holds_user_fallback =
            self.registry.user(requester).is_some_and(|u| u.acl.has_acl("group:grant"));

        if holds_group_grant || holds_user_fallback {
            Ok(())
        } else {
            Err(DispatchError::NoGrant("No permission to alter ACL".to_string()))
        }
    }

    async fn handle_acl_list(
        &self,
        requester: &str,
        session_id: u64,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, DispatchError> {
        let target = frame.target.as_str();

        let rows: Vec<AclRow> = if let Some(group_name) = target.strip_prefix('#').map(|_| target) {
            let group = self.registry.group(group_name).ok_or(DispatchError::NoSuchTarget)?;
            if !group.members.contains(requester) {
                return Err(DispatchError::NotAMember);
            }
            self.store.get_group_acl(group_name).await.map_err(|_| DispatchError::Internal)?
        } else {
            if !self.registry.has_user(target) {
                return Err(DispatchError::NoSuchTarget);
            }
            let token = frame.first("acl").ok_or(DispatchError::NoAcl)?;
            if !is_user_acl(token) {
                return Err(DispatchError::InvalidAcl);
            }
            let requester_user = self.registry.user(requester).ok_or(DispatchError::Internal)?;
            if !requester_user.acl.has_acl("user:grant") || !requester_user.acl.has_acl(token) {
                return Err(DispatchError::NoGrant("No permission to alter ACL".to_string()));
            }
            self.store.get_user_acl(target).await.map_err(|_| DispatchError::Internal)?
        };

        let mut kval = KVal::new();
        kval.insert("target".to_string(), vec![target.to_string()]);
        kval.insert("acl".to_string(), rows.iter().map(|r| r.acl.clone()).collect());
        kval.insert("acl-time".to_string(), rows.iter().map(|r| r.timestamp.to_string()).collect());
        kval.insert("acl-setter".to_string(), rows.iter().map(|r| r.setter.clone()).collect());

        Ok(paginate("acl-list", &kval, &["acl", "acl-time", "acl-setter"])
            .into_iter()
            .map(|part| self.send_to(session_id, Frame::new(self.server_source(), requester, "acl-list", part)))
            .collect())
    }

    fn send_to_handle(&self, handle: &str, frame: Frame) -> ServerAction {
        match self.registry.user(handle) {
            Some(user) => self.send_to(user.session_id, frame),
            None => ServerAction::Log {
                level: LogLevel::Warn,
                message: format!("cannot deliver {} to offline handle {handle}", frame.command),
            },
        }
    }
}

fn validate_handle_kval(frame: &Frame) -> Result<String, DispatchError> {
    let handle = frame.first("handle").ok_or_else(|| DispatchError::InvalidHandle("No handle".to_string()))?;
    if !dcp_core::valid_handle(handle) {
        return Err(DispatchError::InvalidHandle("Invalid handle".to_string()));
    }
    Ok(handle.to_string())
}

/// Constant-time string comparison so password verification does not leak
/// timing information through an early-exit compare.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::InMemoryCredentialStore;
    use std::time::{Duration, Instant};

    #[derive(Clone)]
    struct TestEnv {
        seed: std::cell::Cell<u64>,
    }

    impl Environment for TestEnv {
        type Instant = Instant;
        fn now(&self) -> Instant {
            Instant::now()
        }
        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }
        fn random_bytes(&self, buffer: &mut [u8]) {
            let v = self.seed.get();
            self.seed.set(v.wrapping_add(1));
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = ((v >> (i % 8 * 8)) & 0xFF) as u8;
            }
        }
        fn wall_clock_secs(&self) -> u64 {
            1_700_000_000
        }
    }

    fn driver() -> ServerDriver<TestEnv, InMemoryCredentialStore> {
        let env = TestEnv { seed: std::cell::Cell::new(3) };
        let store = Arc::new(InMemoryCredentialStore::new());
        store.seed("alice", "hunter2", "Alice", &[]);
        let motd = Arc::new(Motd::none());
        let config = ServerConfig {
            server_name: "irc".to_string(),
            server_password: None,
            dialect: Dialect::Binary,
        };
        ServerDriver::new(env, store, motd, config)
    }

    fn signon_frame(handle: &str, password: &str) -> Frame {
        let mut kval = KVal::new();
        kval.insert("handle".to_string(), vec![handle.to_string()]);
        kval.insert("password".to_string(), vec![password.to_string()]);
        Frame::new(handle, "*", "signon", kval)
    }

    #[tokio::test]
    async fn signon_happy_path_emits_signon_then_motd() {
        let mut driver = driver();
        driver.accept(1);
        let actions = driver.dispatch(1, signon_frame("alice", "hunter2")).await;

        assert!(driver.registry.has_user("alice"));
        let sends: Vec<&Frame> = actions
            .iter()
            .filter_map(|a| match a {
                ServerAction::Send { frame, .. } => Some(frame),
                _ => None,
            })
            .collect();
        assert_eq!(sends[0].command, "signon");
        assert_eq!(sends[0].target, "alice");
        assert_eq!(sends[1].command, "motd");
    }

    #[tokio::test]
    async fn signon_wrong_password_is_fatal() {
        let mut driver = driver();
        driver.accept(1);
        let actions = driver.dispatch(1, signon_frame("alice", "wrong")).await;

        let has_close = actions.iter().any(|a| matches!(a, ServerAction::Close { .. }));
        assert!(has_close);
        let error_frame = actions.iter().find_map(|a| match a {
            ServerAction::Send { frame, .. } if frame.command == "error" => Some(frame),
            _ => None,
        });
        assert_eq!(error_frame.unwrap().first("reason"), Some("Invalid password"));
    }

    #[tokio::test]
    async fn commands_before_registration_are_rejected() {
        let mut driver = driver();
        driver.accept(1);
        let frame = Frame::new("alice", "*", "motd", KVal::new());
        let actions = driver.dispatch(1, frame).await;
        let error_frame = actions.iter().find_map(|a| match a {
            ServerAction::Send { frame, .. } => Some(frame),
            _ => None,
        });
        assert_eq!(error_frame.unwrap().first("reason"), Some("You are not registered with the server"));
    }

    #[tokio::test]
    async fn group_enter_broadcasts_to_all_members_including_joiner() {
        let mut driver = driver();
        driver.store.seed("bob", "hunter2", "Bob", &[]);
        driver.accept(1);
        driver.accept(2);
        driver.dispatch(1, signon_frame("alice", "hunter2")).await;
        driver.dispatch(2, signon_frame("bob", "hunter2")).await;

        let join = Frame::new("alice", "#lobby", "group-enter", KVal::new());
        let actions = driver.dispatch(1, join).await;
        let recipients: Vec<u64> =
            actions.iter().filter_map(|a| match a { ServerAction::Send { session_id, .. } => Some(*session_id), _ => None }).collect();
        assert_eq!(recipients, vec![1]);

        let join2 = Frame::new("bob", "#lobby", "group-enter", KVal::new());
        let actions2 = driver.dispatch(2, join2).await;
        let mut recipients2: Vec<u64> =
            actions2.iter().filter_map(|a| match a { ServerAction::Send { session_id, .. } => Some(*session_id), _ => None }).collect();
        recipients2.sort_unstable();
        assert_eq!(recipients2, vec![1, 2]);
    }

    #[tokio::test]
    async fn acl_set_without_grant_is_rejected() {
        let mut driver = driver();
        driver.store.seed("bob", "hunter2", "Bob", &[]);
        driver.accept(1);
        driver.accept(2);
        driver.dispatch(1, signon_frame("alice", "hunter2")).await;
        driver.dispatch(2, signon_frame("bob", "hunter2")).await;

        let mut kval = KVal::new();
        kval.insert("acl".to_string(), vec!["user:auspex".to_string()]);
        let frame = Frame::new("alice", "bob", "acl-set", kval);
        let actions = driver.dispatch(1, frame).await;
        let error_frame = actions.iter().find_map(|a| match a {
            ServerAction::Send { frame, .. } if frame.command == "error" => Some(frame),
            _ => None,
        });
        assert_eq!(error_frame.unwrap().first("reason"), Some("No permission to alter ACL"));
    }

    #[test]
    fn constant_time_eq_rejects_mismatched_length() {
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(constant_time_eq("abc", "abc"));
    }
}
