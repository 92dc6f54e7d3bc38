use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

use crate::handlers::session::{AnalyzeOutcome, CaptureOutcome, ScanSession, SessionStatus};
use crate::models::{BottleRecord, ImagePayload, Inventory, ScanMode, MULTI_ANGLE_STEPS};
use crate::services::{ConnectivityOverride, OverridableConnectivity};

const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Message(String),
    Quit,
}

pub struct CommandHandler {
    session: Arc<ScanSession>,
    connectivity: Arc<OverridableConnectivity>,
}

impl CommandHandler {
    pub fn new(session: Arc<ScanSession>, connectivity: Arc<OverridableConnectivity>) -> Self {
        Self {
            session,
            connectivity,
        }
    }

    /// Handles one line of user input; slash or bang prefixes are optional.
    pub async fn handle_command(&self, input: &str) -> Result<CommandReply> {
        let clean = input.trim().trim_start_matches('/').trim_start_matches('!');
        if clean.is_empty() {
            return Ok(CommandReply::Message(String::new()));
        }

        let (word, argument) = clean
            .split_once(char::is_whitespace)
            .map(|(word, rest)| (word, rest.trim()))
            .unwrap_or((clean, ""));
        let word = word.to_lowercase();

        log::debug!("⌨️ Command: '{}' argument: '{}'", word, argument);

        let message = match word.as_str() {
            "snap" | "photo" | "capture" | "image" => self.handle_capture(argument).await?,
            "scan" | "360" => {
                self.session.start_multi_angle().await;
                format!(
                    "🔄 *360° Precision Scan*\n\nStep 1/{}: {}\nUse: snap <path>",
                    MULTI_ANGLE_STEPS,
                    ScanMode::angle_hint(0).unwrap_or_default()
                )
            }
            "cancel" => {
                self.session.cancel_multi_angle().await;
                "↩️ 360° scan cancelled. Back to single-shot mode.".to_string()
            }
            "analyze" | "analyse" | "calc" | "calculate" => self.handle_analyze().await,
            "results" => {
                let results = self.session.current_results().await;
                if results.is_empty() {
                    "🔍 No results yet. Capture a photo and type 'analyze'.".to_string()
                } else {
                    format_results(&results)
                }
            }
            "add" => self.handle_add(argument).await,
            "remove" | "rm" | "delete" => self.handle_remove(argument).await,
            "inventory" | "inv" | "list" => format_inventory(&self.session.inventory_snapshot().await),
            "clear" => {
                let removed = self.session.clear_inventory().await;
                format!("🧹 Inventory cleared ({} removed).", removed)
            }
            "reset" | "new" => {
                self.session.reset().await;
                "🔁 Ready for a new photo.".to_string()
            }
            "status" => format_status(&self.session.status().await, self.connectivity.current_override()),
            "offline" => {
                self.connectivity.set_override(ConnectivityOverride::ForcedOffline);
                "📴 Offline mode on. Analysis is disabled.".to_string()
            }
            "online" => {
                self.connectivity.set_override(ConnectivityOverride::ForcedOnline);
                "📶 Online mode on. The connectivity check is skipped.".to_string()
            }
            "auto" => {
                self.connectivity.set_override(ConnectivityOverride::Auto);
                "📡 Connectivity is detected automatically again.".to_string()
            }
            "help" | "?" | "commands" => help_text(),
            "quit" | "exit" | "q" => return Ok(CommandReply::Quit),
            other => format!("❓ Unknown command '{}'. Type 'help' for the command list.", other),
        };

        Ok(CommandReply::Message(message))
    }

    async fn handle_capture(&self, argument: &str) -> Result<String> {
        if argument.is_empty() {
            return Ok("❌ Usage: snap <path-to-jpeg>".to_string());
        }

        let image = if argument.starts_with("data:") {
            ImagePayload::from_data_url(argument)
        } else {
            ImagePayload::from_file(argument)
        };
        let image = match image {
            Ok(image) => image,
            Err(e) => {
                log::error!("❌ Failed to load image '{}': {:#}", argument, e);
                return Ok(format!("❌ Could not load image: {}", e));
            }
        };

        let reply = match self.session.capture(image).await {
            Ok(CaptureOutcome::Replaced) => {
                "📸 Photo captured. Type 'analyze' to calculate pours.".to_string()
            }
            Ok(CaptureOutcome::AngleCaptured { step }) => match ScanMode::angle_hint(step) {
                Some(next) => format!(
                    "📸 Angle {}/{} captured.\nStep {}/{}: {}",
                    step,
                    MULTI_ANGLE_STEPS,
                    step + 1,
                    MULTI_ANGLE_STEPS,
                    next
                ),
                None => format!(
                    "📸 All {} angles captured. Type 'analyze' to synthesize & calculate.",
                    MULTI_ANGLE_STEPS
                ),
            },
            Err(e) => format!("⚠️ {}. Type 'analyze' or 'cancel'.", e),
        };

        Ok(reply)
    }

    async fn handle_analyze(&self) -> String {
        match self.session.analyze().await {
            AnalyzeOutcome::NothingToAnalyze => {
                "📷 Capture a photo first: snap <path-to-jpeg>".to_string()
            }
            AnalyzeOutcome::ScanIncomplete { captured } => format!(
                "🔄 360° scan: {}/{} angles captured.\nStep {}/{}: {}",
                captured,
                MULTI_ANGLE_STEPS,
                captured + 1,
                MULTI_ANGLE_STEPS,
                ScanMode::angle_hint(captured).unwrap_or_default()
            ),
            AnalyzeOutcome::Busy => "⏳ Analysis already in progress.".to_string(),
            AnalyzeOutcome::Completed(records) => format_results(&records),
            AnalyzeOutcome::Failed(e) => format!("⚠️ {}", e.user_message()),
            AnalyzeOutcome::Discarded => "🗑️ Session was reset, result discarded.".to_string(),
        }
    }

    async fn handle_add(&self, argument: &str) -> String {
        let number = match argument.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => return "❌ Usage: add <result number>\nExample: add 1".to_string(),
        };

        match self.session.add_to_inventory(number - 1).await {
            Ok(entry) => format!(
                "➕ *{}* added to inventory [{}]",
                entry.record.brand,
                short_id(entry.id)
            ),
            Err(e) => format!("❌ {}", e),
        }
    }

    async fn handle_remove(&self, argument: &str) -> String {
        if argument.is_empty() {
            return "❌ Usage: remove <id>\nIds are listed by 'inventory'.".to_string();
        }

        let inventory = self.session.inventory_snapshot().await;
        let id = match resolve_entry_id(&inventory, argument) {
            Ok(id) => id,
            Err(message) => return message,
        };

        match self.session.remove_from_inventory(id).await {
            Some(entry) => format!("🗑️ Removed *{}* from inventory.", entry.record.brand),
            None => format!("❌ No inventory entry with id {}", argument),
        }
    }
}

/// Accepts a full UUID or an unambiguous prefix of one.
fn resolve_entry_id(inventory: &Inventory, argument: &str) -> std::result::Result<Uuid, String> {
    if let Ok(id) = Uuid::parse_str(argument) {
        return Ok(id);
    }

    let prefix = argument.to_lowercase();
    let matches: Vec<Uuid> = inventory
        .entries()
        .iter()
        .map(|entry| entry.id)
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(format!("❌ No inventory entry with id {}", argument)),
        _ => Err(format!("❌ Id '{}' is ambiguous, type more characters.", argument)),
    }
}

fn short_id(id: Uuid) -> String {
    id.to_string()[..SHORT_ID_LEN].to_string()
}

fn format_pours(record: &BottleRecord) -> String {
    match record.pours() {
        Ok(pours) => format!("{:.1} Pours", pours),
        Err(e) => {
            log::warn!("⚠️ Cannot compute pours for {}: {}", record.brand, e);
            "n/a".to_string()
        }
    }
}

pub fn format_results(records: &[BottleRecord]) -> String {
    if records.is_empty() {
        return "🔍 No bottles detected. Try another photo.".to_string();
    }

    let mut message = format!("🍾 *Detected Bottles* ({} found)\n\n", records.len());
    for (i, record) in records.iter().enumerate() {
        message.push_str(&format!(
            "{}. {}\n   Fill: {}% • Volume: {}ml • Remaining: {}\n   💬 {}\n\n",
            i + 1,
            record.brand,
            record.fill_percentage,
            record.full_volume_ml,
            format_pours(record),
            record.explanation
        ));
    }
    message.push_str("➕ add <n> to keep a bottle in your inventory");
    message
}

pub fn format_inventory(inventory: &Inventory) -> String {
    if inventory.is_empty() {
        return "📦 Your inventory is empty.\nAnalyze a bottle to add it here.".to_string();
    }

    let mut message = format!("📦 *Inventory* ({} bottles)\n\n", inventory.len());
    for entry in inventory.entries() {
        message.push_str(&format!(
            "[{}] {} (added {})\n   {}ml • {}% full • {}\n",
            short_id(entry.id),
            entry.record.brand,
            entry.added_at.format("%H:%M"),
            entry.record.full_volume_ml,
            entry.record.fill_percentage,
            format_pours(&entry.record)
        ));
    }
    message.push_str(&format!("\n📊 Total Inventory: {:.1} POURS", inventory.total_pours()));
    message
}

fn format_status(status: &SessionStatus, mode: ConnectivityOverride) -> String {
    let connectivity = match (status.online, mode) {
        (true, ConnectivityOverride::ForcedOnline) => "✅ online (forced)",
        (true, _) => "✅ online",
        (false, ConnectivityOverride::ForcedOffline) => "📴 offline (forced)",
        (false, _) => "📴 offline",
    };

    let capture = match status.mode {
        ScanMode::Single if status.has_image => "photo ready".to_string(),
        ScanMode::Single => "no photo".to_string(),
        ScanMode::MultiAngle => format!("{}/{} angles", status.scan_step, MULTI_ANGLE_STEPS),
    };

    let mut message = format!(
        "⚙️ *Status*\n\n\
         Mode: {}\n\
         Capture: {}\n\
         Connectivity: {}\n\
         Results: {}\n\
         Inventory: {} bottles ({:.1} pours)",
        status.mode,
        capture,
        connectivity,
        status.result_count,
        status.inventory_count,
        status.total_pours
    );
    if status.analyzing {
        message.push_str("\n⏳ Analysis in progress");
    }
    if let Some(error) = &status.last_error {
        message.push_str(&format!("\n⚠️ Last error: {}", error));
    }
    message
}

fn help_text() -> String {
    "🍾 *PourCount*\n\n\
     snap <path>   capture a JPEG photo\n\
     scan          start a 360° multi-angle scan\n\
     cancel        leave the 360° scan\n\
     analyze       calculate pours for the captured photo(s)\n\
     results       show the last analysis\n\
     add <n>       add result n to the inventory\n\
     inventory     list the inventory and total pours\n\
     remove <id>   remove an inventory entry\n\
     clear         clear the inventory\n\
     reset         start over with a new photo\n\
     status        show session status\n\
     offline       disable analysis\n\
     online        skip the connectivity check\n\
     auto          detect connectivity automatically\n\
     quit          exit"
        .to_string()
}
