// PiShock control panel. One panel per guild, operated through message buttons.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::errors::{BotError, BotResult};

pub const INTENSITY_RANGE: (u8, u8) = (1, 100);
pub const DURATION_RANGE: (u8, u8) = (1, 15);
pub const MAX_COOLDOWN_SECS: u32 = 3600;

const DEFAULT_INTENSITY: u8 = 25;
const DEFAULT_DURATION: u8 = 1;
const DEFAULT_COOLDOWN_SECS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiShockOp {
    Shock,
    Vibrate,
    Beep,
}

impl PiShockOp {
    /// Value of the `Op` field in the PiShock API.
    pub fn code(&self) -> u8 {
        match self {
            PiShockOp::Shock => 0,
            PiShockOp::Vibrate => 1,
            PiShockOp::Beep => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PiShockOp::Shock => "shock",
            PiShockOp::Vibrate => "vibrate",
            PiShockOp::Beep => "beep",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "shock" => Some(PiShockOp::Shock),
            "vibrate" => Some(PiShockOp::Vibrate),
            "beep" => Some(PiShockOp::Beep),
            _ => None,
        }
    }

    pub fn all() -> [PiShockOp; 3] {
        [PiShockOp::Shock, PiShockOp::Vibrate, PiShockOp::Beep]
    }
}

impl fmt::Display for PiShockOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelState {
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: Option<u64>,
    pub share_code: String,
    pub intensity: u8,
    pub duration: u8,
    pub enabled: bool,
    pub cooldown_secs: u32,
    pub last_operated_by: Option<u64>,
    pub last_operated_at: Option<DateTime<Utc>>,
}

/// A single operate call against the PiShock API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperateRequest {
    pub share_code: String,
    pub op: PiShockOp,
    pub intensity: u8,
    pub duration: u8,
    /// Shown in the PiShock logs as the sender.
    pub operator_name: String,
}

#[async_trait]
pub trait PiShockApi: Send + Sync {
    async fn operate(&self, request: &OperateRequest) -> BotResult<()>;
}

#[async_trait]
pub trait PanelStore: Send + Sync {
    async fn get_panel(&self, guild_id: u64) -> BotResult<Option<PanelState>>;
    async fn save_panel(&self, panel: &PanelState) -> BotResult<()>;
}

pub struct PiShockService<S: PanelStore> {
    store: S,
    api: Option<Arc<dyn PiShockApi>>,
    last_operation: DashMap<u64, DateTime<Utc>>,
}

impl<S: PanelStore> PiShockService<S> {
    pub fn new(store: S, api: Option<Arc<dyn PiShockApi>>) -> Self {
        Self {
            store,
            api,
            last_operation: DashMap::new(),
        }
    }

    pub async fn panel(&self, guild_id: u64) -> BotResult<Option<PanelState>> {
        self.store.get_panel(guild_id).await
    }

    async fn require_panel(&self, guild_id: u64) -> BotResult<PanelState> {
        self.store.get_panel(guild_id).await?.ok_or_else(|| {
            BotError::not_found(
                "PANEL_NOT_CONFIGURED",
                "No PiShock panel here yet. Run `/pishock setup` first.",
            )
        })
    }

    /// Create or move the panel. Keeps existing settings when re-run.
    pub async fn setup(&self, guild_id: u64, channel_id: u64, share_code: &str) -> BotResult<PanelState> {
        let share_code = share_code.trim();
        if share_code.is_empty() || !share_code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(BotError::validation(
                "INVALID_SHARE_CODE",
                "Share codes are the alphanumeric code from the PiShock website.",
            ));
        }

        let panel = match self.store.get_panel(guild_id).await? {
            Some(mut existing) => {
                existing.channel_id = channel_id;
                existing.share_code = share_code.to_string();
                existing.message_id = None;
                existing
            }
            None => PanelState {
                guild_id,
                channel_id,
                message_id: None,
                share_code: share_code.to_string(),
                intensity: DEFAULT_INTENSITY,
                duration: DEFAULT_DURATION,
                enabled: true,
                cooldown_secs: DEFAULT_COOLDOWN_SECS,
                last_operated_by: None,
                last_operated_at: None,
            },
        };
        self.store.save_panel(&panel).await?;
        Ok(panel)
    }

    pub async fn attach_message(&self, guild_id: u64, message_id: u64) -> BotResult<()> {
        let mut panel = self.require_panel(guild_id).await?;
        panel.message_id = Some(message_id);
        self.store.save_panel(&panel).await
    }

    pub async fn set_intensity(&self, guild_id: u64, intensity: i64) -> BotResult<PanelState> {
        let intensity = check_range("INVALID_INTENSITY", "Intensity", intensity, INTENSITY_RANGE)?;
        let mut panel = self.require_panel(guild_id).await?;
        panel.intensity = intensity;
        self.store.save_panel(&panel).await?;
        Ok(panel)
    }

    pub async fn set_duration(&self, guild_id: u64, duration: i64) -> BotResult<PanelState> {
        let duration = check_range("INVALID_DURATION", "Duration", duration, DURATION_RANGE)?;
        let mut panel = self.require_panel(guild_id).await?;
        panel.duration = duration;
        self.store.save_panel(&panel).await?;
        Ok(panel)
    }

    pub async fn set_cooldown(&self, guild_id: u64, secs: i64) -> BotResult<PanelState> {
        if !(0..=MAX_COOLDOWN_SECS as i64).contains(&secs) {
            return Err(BotError::validation(
                "INVALID_COOLDOWN",
                format!("Cooldown must be between 0 and {} seconds.", MAX_COOLDOWN_SECS),
            ));
        }
        let mut panel = self.require_panel(guild_id).await?;
        panel.cooldown_secs = secs as u32;
        self.store.save_panel(&panel).await?;
        Ok(panel)
    }

    /// Flip the enabled flag, returning the new state.
    pub async fn toggle(&self, guild_id: u64) -> BotResult<PanelState> {
        let mut panel = self.require_panel(guild_id).await?;
        panel.enabled = !panel.enabled;
        self.store.save_panel(&panel).await?;
        Ok(panel)
    }

    pub async fn operate(
        &self,
        guild_id: u64,
        user_id: u64,
        operator_name: &str,
        op: PiShockOp,
        now: DateTime<Utc>,
    ) -> BotResult<PanelState> {
        let mut panel = self.require_panel(guild_id).await?;
        let api = self.api.as_ref().ok_or_else(|| {
            BotError::config(
                "PISHOCK_NOT_CONFIGURED",
                "PiShock credentials are not configured.",
            )
        })?;

        if !panel.enabled {
            return Err(BotError::permission(
                "PANEL_DISABLED",
                "The PiShock panel is currently disabled.",
            ));
        }

        let previous = self.claim_slot(&panel, now)?;

        api.operate(&OperateRequest {
            share_code: panel.share_code.clone(),
            op,
            intensity: panel.intensity,
            duration: panel.duration,
            operator_name: operator_name.to_string(),
        })
        .await
        .map_err(|e| {
            self.release_slot(guild_id, previous);
            e
        })?;

        panel.last_operated_by = Some(user_id);
        panel.last_operated_at = Some(now);
        self.store.save_panel(&panel).await?;

        tracing::info!(guild_id, user_id, op = %op, "PiShock operated");
        Ok(panel)
    }

    /// Check the cooldown and take the guild's slot in one step, so concurrent
    /// presses see each other. Returns the slot's previous value.
    fn claim_slot(
        &self,
        panel: &PanelState,
        now: DateTime<Utc>,
    ) -> BotResult<Option<DateTime<Utc>>> {
        let cooldown = Duration::seconds(panel.cooldown_secs as i64);
        match self.last_operation.entry(panel.guild_id) {
            Entry::Occupied(mut slot) => {
                check_cooldown(*slot.get(), cooldown, now)?;
                Ok(Some(slot.insert(now)))
            }
            Entry::Vacant(slot) => {
                if let Some(last) = panel.last_operated_at {
                    check_cooldown(last, cooldown, now)?;
                }
                slot.insert(now);
                Ok(None)
            }
        }
    }

    fn release_slot(&self, guild_id: u64, previous: Option<DateTime<Utc>>) {
        match previous {
            Some(at) => {
                self.last_operation.insert(guild_id, at);
            }
            None => {
                self.last_operation.remove(&guild_id);
            }
        }
    }
}

fn check_cooldown(last: DateTime<Utc>, cooldown: Duration, now: DateTime<Utc>) -> BotResult<()> {
    let ready_at = last + cooldown;
    if now < ready_at {
        let wait = (ready_at - now).num_seconds().max(1);
        return Err(BotError::validation(
            "COOLDOWN",
            format!("The panel is cooling down. Try again in {}s.", wait),
        ));
    }
    Ok(())
}

fn check_range(code: &'static str, label: &str, value: i64, (min, max): (u8, u8)) -> BotResult<u8> {
    if value < min as i64 || value > max as i64 {
        return Err(BotError::validation(
            code,
            format!("{} must be between {} and {}.", label, min, max),
        ));
    }
    Ok(value as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryPanels {
        panels: Mutex<HashMap<u64, PanelState>>,
    }

    #[async_trait]
    impl PanelStore for InMemoryPanels {
        async fn get_panel(&self, guild_id: u64) -> BotResult<Option<PanelState>> {
            Ok(self.panels.lock().unwrap().get(&guild_id).cloned())
        }
        async fn save_panel(&self, panel: &PanelState) -> BotResult<()> {
            self.panels
                .lock()
                .unwrap()
                .insert(panel.guild_id, panel.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingApi {
        calls: Mutex<Vec<OperateRequest>>,
    }

    #[async_trait]
    impl PiShockApi for RecordingApi {
        async fn operate(&self, request: &OperateRequest) -> BotResult<()> {
            self.calls.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    fn service(api: Option<Arc<RecordingApi>>) -> PiShockService<InMemoryPanels> {
        PiShockService::new(
            InMemoryPanels::default(),
            api.map(|a| a as Arc<dyn PiShockApi>),
        )
    }

    #[test]
    fn test_op_codes() {
        assert_eq!(PiShockOp::Shock.code(), 0);
        assert_eq!(PiShockOp::Vibrate.code(), 1);
        assert_eq!(PiShockOp::Beep.code(), 2);
        assert_eq!(PiShockOp::from_name("beep"), Some(PiShockOp::Beep));
        assert_eq!(PiShockOp::from_name("zap"), None);
    }

    #[tokio::test]
    async fn test_setter_ranges() {
        let service = service(None);
        assert!(service.set_intensity(1, 50).await.unwrap_err().is_not_found());

        service.setup(1, 10, "ABC123").await.unwrap();
        assert_eq!(service.set_intensity(1, 100).await.unwrap().intensity, 100);
        assert_eq!(service.set_intensity(1, 0).await.unwrap_err().code, "INVALID_INTENSITY");
        assert_eq!(service.set_duration(1, 16).await.unwrap_err().code, "INVALID_DURATION");
        assert_eq!(service.set_cooldown(1, 3601).await.unwrap_err().code, "INVALID_COOLDOWN");
        assert_eq!(service.set_cooldown(1, 0).await.unwrap().cooldown_secs, 0);
        assert_eq!(service.setup(1, 10, "no spaces").await.unwrap_err().code, "INVALID_SHARE_CODE");
    }

    #[tokio::test]
    async fn test_operate_check_order() {
        // Not configured wins over everything
        let no_api = service(None);
        let now = Utc::now();
        assert_eq!(
            no_api.operate(1, 5, "agent", PiShockOp::Beep, now).await.unwrap_err().code,
            "PANEL_NOT_CONFIGURED"
        );
        no_api.setup(1, 10, "ABC").await.unwrap();
        assert_eq!(
            no_api.operate(1, 5, "agent", PiShockOp::Beep, now).await.unwrap_err().code,
            "PISHOCK_NOT_CONFIGURED"
        );

        let api = Arc::new(RecordingApi::default());
        let service = service(Some(api.clone()));
        service.setup(1, 10, "ABC").await.unwrap();
        service.toggle(1).await.unwrap();
        assert_eq!(
            service.operate(1, 5, "agent", PiShockOp::Beep, now).await.unwrap_err().code,
            "PANEL_DISABLED"
        );
        service.toggle(1).await.unwrap();

        let panel = service.operate(1, 5, "agent", PiShockOp::Vibrate, now).await.unwrap();
        assert_eq!(panel.last_operated_by, Some(5));
        let calls = api.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].op.code(), 1);
        assert_eq!(calls[0].intensity, DEFAULT_INTENSITY);
    }

    #[tokio::test]
    async fn test_cooldown() {
        let api = Arc::new(RecordingApi::default());
        let service = service(Some(api.clone()));
        service.setup(1, 10, "ABC").await.unwrap();
        service.set_cooldown(1, 30).await.unwrap();

        let start = Utc::now();
        service.operate(1, 5, "a", PiShockOp::Beep, start).await.unwrap();
        let err = service
            .operate(1, 6, "b", PiShockOp::Beep, start + Duration::seconds(10))
            .await
            .unwrap_err();
        assert_eq!(err.code, "COOLDOWN");
        assert!(err.message.contains("20s"));

        service
            .operate(1, 6, "b", PiShockOp::Beep, start + Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(api.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_presses_fire_once() {
        let api = Arc::new(RecordingApi::default());
        let service = Arc::new(service(Some(api.clone())));
        service.setup(1, 10, "ABC").await.unwrap();

        let now = Utc::now();
        let presses: Vec<_> = (0..16)
            .map(|user| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service.operate(1, user, "agent", PiShockOp::Beep, now).await
                })
            })
            .collect();

        let mut fired = 0;
        for press in presses {
            match press.await.unwrap() {
                Ok(_) => fired += 1,
                Err(e) => assert_eq!(e.code, "COOLDOWN"),
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(api.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_call_gives_the_slot_back() {
        struct FailingApi;

        #[async_trait]
        impl PiShockApi for FailingApi {
            async fn operate(&self, _request: &OperateRequest) -> BotResult<()> {
                Err(BotError::pishock("PISHOCK_REJECTED", "offline"))
            }
        }

        let service = PiShockService::new(
            InMemoryPanels::default(),
            Some(Arc::new(FailingApi) as Arc<dyn PiShockApi>),
        );
        service.setup(1, 10, "ABC").await.unwrap();
        let now = Utc::now();

        let err = service.operate(1, 5, "a", PiShockOp::Beep, now).await.unwrap_err();
        assert_eq!(err.code, "PISHOCK_REJECTED");
        let err = service.operate(1, 5, "a", PiShockOp::Beep, now).await.unwrap_err();
        assert_eq!(err.code, "PISHOCK_REJECTED");
    }
}
