use serde_json::{json, Map, Value as Json};
use tracing::{debug, error, info};

use crate::codec;
use crate::communication::paint_target::PaintTarget;
use crate::communication::{ClientCache, CommunicationManager};
use crate::config::SystemMessages;
use crate::connector::{ConnectorKey, ConnectorType, Ui};
use crate::error::{Result, UidlError};
use crate::layout::LayoutValidator;
use crate::communication::resources::ThemeResources;
use crate::rpc::{collect_pending_rpc_calls, encode_invocation};
use crate::session::SessionState;

/// What the client asked the next response to contain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaintOptions {
    /// send everything as if the client had nothing
    pub repaint_all: bool,
    /// report components with unresolvable relative sizes, only with `repaint_all`
    pub analyze_layouts: bool,
    /// id of a connector the client wants highlighted, only with `repaint_all`
    pub highlight: Option<String>,
}

impl PaintOptions {
    /// the options of a full repaint without debug extras
    pub fn repaint_all() -> Self {
        PaintOptions {
            repaint_all: true,
            ..PaintOptions::default()
        }
    }
}

struct PaintEnv<'a> {
    messages: &'a SystemMessages,
    max_inactive_interval: u64,
    validator: &'a dyn LayoutValidator,
    theme_resources: Option<&'a dyn ThemeResources>,
    timings: [u64; 2],
}

/// Builds the response object for one UI: every section from `changes` to `timings`.
///
/// A full repaint first forgets what the client knows. The tracker is in its writing state
/// while the response is built and leaves it whether or not building succeeds.
///
/// # Errors
/// returns [`UidlError::Paint`] naming the connector whose state, legacy paint or RPC
/// parameters could not be serialized
pub fn write_uidl_response(
    state: &mut SessionState,
    ui_id: u32,
    options: &PaintOptions,
) -> Result<Map<String, Json>> {
    let timings = state.timings();
    let SessionState {
        uis,
        communication,
        system_messages,
        wrapped,
        layout_validator,
        theme_resources,
        locale,
        ..
    } = state;
    let ui = uis
        .get_mut(&ui_id)
        .ok_or_else(|| UidlError::StringErr(format!("ui {} does not exist", ui_id)))?;
    debug!("creating response for ui {}", ui_id);

    if options.repaint_all {
        communication.client_cache(ui_id).clear();
        ui.mark_all_dirty();
        ui.tracker_mut().mark_all_client_sides_uninitialized();
        communication.locales.reset(locale);
    }

    let env = PaintEnv {
        messages: system_messages,
        max_inactive_interval: wrapped.max_inactive_interval(),
        validator: &**layout_validator,
        theme_resources: theme_resources.as_deref(),
        timings,
    };

    ui.tracker_mut().set_writing_response(true)?;
    let result = assemble(ui, communication, options, &env);
    let finished = ui.tracker_mut().set_writing_response(false);
    let response = result?;
    finished?;
    Ok(response)
}

fn describe(ui: &Ui, connector: ConnectorKey) -> String {
    match (ui.connector_id(connector), ui.connector_type(connector)) {
        (Some(id), _) => id.to_string(),
        (None, Some(connector_type)) => connector_type.name.to_string(),
        (None, None) => format!("{:?}", connector),
    }
}

fn connector_type_of(ui: &Ui, connector: ConnectorKey) -> Result<&'static ConnectorType> {
    ui.connector_type(connector)
        .ok_or_else(|| {
            UidlError::Tree(format!("connector {:?} vanished while painting", connector))
        })
}

fn assemble(
    ui: &mut Ui,
    communication: &mut CommunicationManager,
    options: &PaintOptions,
    env: &PaintEnv<'_>,
) -> Result<Map<String, Json>> {
    let (dirty, hidden): (Vec<ConnectorKey>, Vec<ConnectorKey>) = ui
        .tracker()
        .dirty_connectors()
        .partition(|c| ui.is_visible(*c));
    debug!("found {} dirty connectors to paint", dirty.len());

    for connector in &dirty {
        let connector = *connector;
        let initial = !ui.tracker().is_client_side_initialized(connector);
        ui.with_logic(connector, |logic, ui| {
            logic.before_client_response(ui, connector, initial)
        });
    }

    let CommunicationManager {
        type_tags,
        client_caches,
        connector_resources,
        locales,
        timeout_interval,
        ..
    } = communication;

    let mut response = Map::new();
    let mut target = PaintTarget::new(type_tags);
    legacy_paint(ui, &dirty, &mut target)?;

    let invalid_layouts = if options.analyze_layouts {
        Some(env.validator.validate(ui))
    } else {
        None
    };
    response.insert("changes".to_string(), Json::Array(target.close()?));

    let mut states = Map::new();
    for connector in &dirty {
        let id = describe(ui, *connector);
        let diff = encode_state(ui, *connector).map_err(|e| e.painting(id.clone()))?;
        if let Some(Json::Object(diff)) = diff {
            if !diff.is_empty() {
                states.insert(id, Json::Object(diff));
            }
        }
    }
    response.insert("state".to_string(), Json::Object(states));

    let mut types = Map::new();
    for connector in &dirty {
        let tag = target.tag(connector_type_of(ui, *connector)?);
        types.insert(describe(ui, *connector), Json::String(tag.to_string()));
    }
    response.insert("types".to_string(), Json::Object(types));

    let mut hierarchy = Map::new();
    for connector in &dirty {
        let children: Vec<Json> = ui
            .all_children(*connector)
            .filter(|child| ui.is_visible(*child))
            .filter_map(|child| ui.connector_id(child))
            .map(|id| Json::String(id.to_string()))
            .collect();
        hierarchy.insert(describe(ui, *connector), Json::Array(children));
    }
    response.insert("hierarchy".to_string(), Json::Object(hierarchy));

    let mut calls = Vec::new();
    for invocation in collect_pending_rpc_calls(ui, &dirty) {
        match encode_invocation(ui, &invocation) {
            Ok(encoded) => calls.push(encoded),
            Err(e) => {
                let failure = UidlError::Rpc {
                    interface: invocation.interface.clone(),
                    method: invocation.method.clone(),
                    message: e.to_string(),
                };
                return Err(failure.painting(describe(ui, invocation.connector)));
            }
        }
    }
    if !calls.is_empty() {
        response.insert("rpc".to_string(), Json::Array(calls));
    }

    let mut meta = Map::new();
    if options.repaint_all {
        meta.insert("repaintAll".to_string(), Json::Bool(true));
        if let Some(invalid_layouts) = &invalid_layouts {
            meta.insert(
                "invalidLayouts".to_string(),
                Json::Array(invalid_layouts.iter().map(|l| l.to_json()).collect()),
            );
        }
        if let Some(highlighted) = options.highlight.as_deref().and_then(|id| ui.connector(id)) {
            info!("highlighting {}", hierarchy_path(ui, highlighted));
            meta.insert("hl".to_string(), Json::String(describe(ui, highlighted)));
        }
    }
    let expired = &env.messages.session_expired;
    if expired.enabled && expired.caption().is_none() && expired.message().is_none() {
        let interval = env.max_inactive_interval;
        if options.repaint_all || *timeout_interval != Some(interval) {
            meta.insert(
                "timedRedirect".to_string(),
                json!({
                    "interval": interval + 15,
                    "url": expired.url().unwrap_or_default(),
                }),
            );
        }
        *timeout_interval = Some(interval);
    }
    response.insert("meta".to_string(), Json::Object(meta));

    let mut resources = Map::new();
    let theme = ui.theme().unwrap_or_default();
    for resource in target.used_resources() {
        match env.theme_resources.and_then(|r| r.resource(theme, resource)) {
            Some(content) => {
                resources.insert(resource.to_string(), Json::String(content));
            }
            None => error!("custom layout not found: {}", resource),
        }
    }
    response.insert("resources".to_string(), Json::Object(resources));

    let used_types: Vec<&'static ConnectorType> = target.used_types().collect();
    let cache: &mut ClientCache = client_caches.entry(ui.id()).or_default();
    let mut new_types = Vec::new();
    let mut mappings = Map::new();
    for connector_type in used_types.iter().copied() {
        if cache.cache(connector_type.name) {
            new_types.push(connector_type);
            mappings.insert(
                connector_type.name.to_string(),
                Json::from(target.tag(connector_type)),
            );
        }
    }
    if !mappings.is_empty() {
        response.insert("typeMappings".to_string(), Json::Object(mappings));
        let mut inheritance = Map::new();
        for connector_type in used_types.iter().copied() {
            if let Some(parent) = connector_type.parent {
                let parent_tag = target.type_tags().tag_for(parent);
                inheritance.insert(target.tag(connector_type).to_string(), Json::from(parent_tag));
            }
        }
        if !inheritance.is_empty() {
            response.insert("typeInheritanceMap".to_string(), Json::Object(inheritance));
        }
    }

    // super types first, a sub type's scripts may rely on its super type's
    new_types.sort_by_key(|connector_type| connector_type.hierarchy().count());
    let mut scripts = Vec::new();
    let mut styles = Vec::new();
    for connector_type in new_types.iter().copied() {
        for script in connector_type.scripts {
            let url = connector_resources.register_resource(script, connector_type);
            scripts.push(Json::String(url));
        }
        for style in connector_type.styles {
            let url = connector_resources.register_resource(style, connector_type);
            styles.push(Json::String(url));
        }
    }
    if !scripts.is_empty() {
        response.insert("scriptDependencies".to_string(), Json::Array(scripts));
    }
    if !styles.is_empty() {
        response.insert("styleDependencies".to_string(), Json::Array(styles));
    }

    response.insert("locales".to_string(), Json::Array(locales.drain()));

    let tracker = ui.tracker_mut();
    for connector in &dirty {
        tracker.mark_clean(*connector);
        tracker.mark_client_side_initialized(*connector);
    }
    // hidden connectors are repainted when they become visible
    for connector in &hidden {
        tracker.mark_clean(*connector);
    }
    if tracker.has_dirty_connectors() {
        error!(
            "connectors have been marked as dirty during the paint phase, \
             they are kept for the next response"
        );
    }

    response.insert("timings".to_string(), json!(env.timings));
    Ok(response)
}

/// Paints legacy connectors, parents before children, each as
/// `["change", {"pid": id}, [tag, {"id": id, ...}, ...]]`.
fn legacy_paint(ui: &mut Ui, dirty: &[ConnectorKey], target: &mut PaintTarget<'_>) -> Result<()> {
    let mut legacy: Vec<ConnectorKey> = dirty
        .iter()
        .copied()
        .filter(|c| ui.logic(*c).map_or(false, |logic| logic.is_legacy()))
        .collect();
    legacy.sort_by_key(|c| ui.depth(*c));

    for connector in legacy {
        let id = describe(ui, connector);
        let connector_type = connector_type_of(ui, connector)?;
        debug!("painting legacy connector {}", id);
        target.start_tag("change")?;
        target.add_attribute("pid", id.as_str())?;
        target.start_paintable(connector_type, &id)?;
        let painted = ui.with_logic(connector, |logic, ui| logic.paint(ui, connector, target));
        if let Some(result) = painted {
            result.map_err(|e| e.painting(id.clone()))?;
        }
        target.end_paintable(connector_type)?;
        target.end_tag("change")?;
    }
    Ok(())
}

/// Encodes the state of `connector` against the state last sent, or against the default
/// state when nothing was sent yet, and remembers the new encoding as the next reference.
fn encode_state(ui: &mut Ui, connector: ConnectorKey) -> Result<Option<Json>> {
    let (value, state_type, default) = match ui.shared_state(connector) {
        Some(state) => (state.to_value(), state.state_type(), state.default_value()),
        None => return Ok(None),
    };
    let reference = match ui.tracker().diff_state(connector) {
        Some(reference) => reference.clone(),
        None => codec::encode(&default, None, &state_type, &*ui)?.encoded,
    };
    let result = codec::encode(&value, Some(&reference), &state_type, &*ui)?;
    ui.tracker_mut().set_diff_state(connector, result.encoded);
    Ok(result.diff)
}

fn hierarchy_path(ui: &Ui, connector: ConnectorKey) -> String {
    let mut path: Vec<String> = std::iter::successors(Some(connector), |c| ui.parent(*c))
        .map(|c| describe_with_type(ui, c))
        .collect();
    path.reverse();
    path.join(" > ")
}

fn describe_with_type(ui: &Ui, connector: ConnectorKey) -> String {
    match ui.connector_type(connector) {
        Some(connector_type) => format!("{}({})", connector_type.name, describe(ui, connector)),
        None => describe(ui, connector),
    }
}
