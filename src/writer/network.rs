//! Publishing events on a network bus.

use super::SinkWriter;
use crate::bus::{Bus, Outlet};
use crate::clock::now_millis;
use crate::config::Connection;
use crate::context::HubContext;
use crate::error::HubResult;
use crate::event::{Event, Timestamp};
use crate::schema::{SlotDef, SlotSchema};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Publishes each event through the outlet of its scope.
///
/// Without a slot file, outlets are created on first use. With one, only the
/// declared slots exist and events for other scopes are not written.
pub struct NetworkWriter {
    kind: Connection,
    bus: Arc<dyn Bus>,
    slot_file: Option<PathBuf>,
    send_init_value: bool,
    predefined: bool,
    outlets: HashMap<String, Box<dyn Outlet>>,
}

impl NetworkWriter {
    /// Writer publishing on `bus`.
    pub fn new(ctx: &HubContext, bus: Arc<dyn Bus>, kind: Connection) -> Self {
        Self {
            kind,
            bus,
            slot_file: ctx.config.slot_file.clone(),
            send_init_value: ctx.config.send_init_value,
            predefined: false,
            outlets: HashMap::new(),
        }
    }

    /// Scopes that currently have an outlet.
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.outlets.keys().cloned().collect();
        scopes.sort();
        scopes
    }

    fn open(&mut self, slot: &SlotDef) -> HubResult<&mut Box<dyn Outlet>> {
        let outlet = self.bus.open_outlet(slot)?;
        Ok(self.outlets.entry(slot.scope()).or_insert(outlet))
    }
}

impl std::fmt::Debug for NetworkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkWriter")
            .field("kind", &self.kind)
            .field("predefined", &self.predefined)
            .field("outlets", &self.outlets.len())
            .finish()
    }
}

impl SinkWriter for NetworkWriter {
    fn kind(&self) -> Connection {
        self.kind
    }

    fn initialize(&mut self) -> HubResult<()> {
        let Some(path) = self.slot_file.clone() else {
            info!(connection = %self.kind, "publishing with dynamic slots");
            return Ok(());
        };
        let schema = SlotSchema::load(&path)?;
        self.predefined = true;
        let send_init_value = self.send_init_value;
        for slot in schema.slots() {
            let outlet = self.open(slot)?;
            if send_init_value {
                let init = Event::new(
                    slot.type_tag.initial_value(),
                    slot.namespace.clone(),
                    slot.label.clone(),
                    now_millis(),
                );
                outlet.push(&init)?;
            }
        }
        info!(
            connection = %self.kind,
            slots = self.outlets.len(),
            send_init_value,
            "publishing with predefined slots"
        );
        Ok(())
    }

    fn write(&mut self, event: &Event) -> HubResult<Option<Timestamp>> {
        let scope = event.scope();
        if !self.outlets.contains_key(&scope) {
            if self.predefined {
                debug!(%scope, "no predefined slot for event");
                return Ok(None);
            }
            let slot = SlotDef::new(event.namespace.clone(), event.label.clone(), event.type_tag());
            debug!(%scope, tag = %slot.type_tag, "creating slot on first use");
            self.open(&slot)?;
        }
        let Some(outlet) = self.outlets.get_mut(&scope) else {
            return Ok(None);
        };
        let written_at = now_millis();
        outlet.push(event)?;
        Ok(Some(written_at))
    }

    fn close(&mut self) -> HubResult<()> {
        self.outlets.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalBus, SubscriptionFilter};
    use crate::config::HubConfig;
    use crate::event::Value;
    use parking_lot::Mutex;
    use std::io::Write;

    fn setup(slot_file: Option<PathBuf>, send_init_value: bool) -> (NetworkWriter, LocalBus, Arc<Mutex<Vec<Event>>>) {
        let ctx = HubContext::new(HubConfig {
            slot_file,
            send_init_value,
            silent: true,
            ..HubConfig::default()
        });
        let bus = LocalBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = bus
            .subscribe(SubscriptionFilter::All, Arc::new(move |e: Event| sink.lock().push(e)))
            .unwrap();
        std::mem::forget(sub);
        let writer = NetworkWriter::new(&ctx, Arc::new(bus.clone()), Connection::NetworkBus);
        (writer, bus, seen)
    }

    #[test]
    fn dynamic_slots_are_created_on_first_use() {
        let (mut writer, bus, seen) = setup(None, false);
        writer.initialize().unwrap();
        let e = Event::new(Value::Float(0.5), "head", "x", 10);
        assert!(writer.write(&e).unwrap().is_some());
        assert!(writer.write(&e).unwrap().is_some());
        assert_eq!(bus.opened_outlets(), vec!["head/x".to_string()]);
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn predefined_slots_reject_unknown_scopes_and_send_init_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"<slots><hand><grip type="sfbool"/><pose type="sfrotation"/></hand></slots>"#)
            .unwrap();
        let (mut writer, _bus, seen) = setup(Some(file.path().to_path_buf()), true);
        writer.initialize().unwrap();
        assert_eq!(writer.scopes(), vec!["hand/grip".to_string(), "hand/pose".to_string()]);
        {
            let init = seen.lock();
            assert_eq!(init.len(), 2);
            assert_eq!(init[0].value, Value::Bool(false));
            assert_eq!(init[1].value, Value::Rotation([0.0, 0.0, 1.0, 0.0]));
        }
        assert!(writer
            .write(&Event::new(Value::Bool(true), "hand", "grip", 5))
            .unwrap()
            .is_some());
        assert_eq!(
            writer.write(&Event::new(Value::Int(1), "other", "slot", 5)).unwrap(),
            None
        );
        assert_eq!(seen.lock().len(), 3);
    }
}
