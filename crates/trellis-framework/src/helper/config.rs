//! Translation of XML configuration trees into service descriptions.
//!
//! Everything here is pure parsing except [`connect_proxy`] and
//! [`disconnect_proxies`], which apply parsed channel connections to the
//! context proxy.

use tracing::{debug, error, warn};
use trellis_core::{ConfigError, ConfigTree, XMLATTR, parse_bool};

use crate::context::AppContext;
use crate::error::{ParseError, ParseResult};
use crate::service::{
    Access, ObjectServiceConfig, ProxyConnections, ProxyConnectionsMap, ServiceConfig, group_key,
};

/// One `<connect>` group resolved to a signal and its slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// `(uid, signal key)`.
    pub signal: (String, String),
    /// `(uid, slot key)` pairs.
    pub slots: Vec<(String, String)>,
}

/// Splits `uid/key`.
fn split_uid_key(entry: &str) -> ParseResult<(String, String)> {
    let entry = entry.trim();
    match entry.split_once('/') {
        Some((uid, key)) if !uid.is_empty() && !key.is_empty() => {
            Ok((uid.to_string(), key.to_string()))
        }
        _ => Err(ParseError::BadConnection(entry.to_string())),
    }
}

fn entries(cfg: &ConfigTree, tag: &str) -> ParseResult<Vec<(String, String)>> {
    cfg.equal_range(tag)
        .map(|node| split_uid_key(node.data()))
        .collect()
}

fn required_attr(node: &ConfigTree, context: &str, attribute: &'static str) -> ParseResult<String> {
    match node.attr(attribute) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ParseError::MissingAttribute {
            context: context.to_string(),
            attribute,
        }),
    }
}

fn optional_attr<'a>(node: &'a ConfigTree, attribute: &str) -> Option<&'a str> {
    node.attr(attribute)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Reads a boolean attribute; `autoConnect` also accepts `auto_connect`.
fn bool_attr(node: &ConfigTree, context: &str, attribute: &str) -> ParseResult<Option<bool>> {
    let raw = optional_attr(node, attribute).or_else(|| match attribute {
        "autoConnect" => optional_attr(node, "auto_connect"),
        _ => None,
    });
    raw.map(|value| {
        parse_bool(value).ok_or_else(|| {
            ParseError::Config(ConfigError::BadValue {
                path: format!("{context}.{XMLATTR}.{attribute}"),
                value: value.to_string(),
            })
        })
    })
    .transpose()
}

// ─── Connections ────────────────────────────────────────────────────────────

/// Reads a `<connect>` group holding exactly one `<signal>` and any number
/// of `<slot>` entries, each written `uid/key`.
pub fn parse_connections(cfg: &ConfigTree) -> ParseResult<ConnectionInfo> {
    let mut signals = entries(cfg, "signal")?;
    if signals.len() != 1 {
        return Err(ParseError::SignalCount(signals.len()));
    }
    let slots = entries(cfg, "slot")?;
    Ok(ConnectionInfo {
        signal: signals.remove(0),
        slots,
    })
}

/// Reads a `<connect>` group bound to a proxy channel.
///
/// The channel is the `channel` attribute, or `gen_channel()` when absent.
pub fn parse_connections2(
    cfg: &ConfigTree,
    err_head: &str,
    gen_channel: impl FnOnce() -> String,
) -> ParseResult<ProxyConnections> {
    let channel = optional_attr(cfg, "channel")
        .map(str::to_string)
        .unwrap_or_else(gen_channel);

    let mut connections = ProxyConnections::new(channel);
    connections.signals = entries(cfg, "signal").inspect_err(|e| {
        error!(context = %err_head, error = %e, "Invalid signal entry");
    })?;
    connections.slots = entries(cfg, "slot").inspect_err(|e| {
        error!(context = %err_head, error = %e, "Invalid slot entry");
    })?;
    debug!(
        context = %err_head,
        channel = %connections.channel,
        signals = connections.signals.len(),
        slots = connections.slots.len(),
        "Parsed channel connections"
    );
    Ok(connections)
}

/// Attaches every resolvable end of `connections` to the context proxy.
///
/// Unknown uids and keys are logged and skipped.
pub fn connect_proxy(ctx: &AppContext, connections: &ProxyConnections) {
    let proxy = ctx.proxy();
    let channel = connections.channel.as_str();
    for (uid, key) in &connections.signals {
        match ctx.signals_of(uid).and_then(|source| source.signal(key)) {
            Some(signal) => {
                if let Err(e) = proxy.connect_signal(channel, signal) {
                    error!(channel = %channel, uid = %uid, signal = %key, error = %e, "Cannot connect signal");
                }
            }
            None => warn!(channel = %channel, uid = %uid, signal = %key, "Signal not found"),
        }
    }
    for (uid, key) in &connections.slots {
        match ctx.slots_of(uid).and_then(|target| target.slot(key)) {
            Some(slot) => {
                if let Err(e) = proxy.connect_slot(channel, slot) {
                    error!(channel = %channel, uid = %uid, slot = %key, error = %e, "Cannot connect slot");
                }
            }
            None => warn!(channel = %channel, uid = %uid, slot = %key, "Slot not found"),
        }
    }
}

/// Detaches every channel connection stored under `key` and forgets them.
pub fn disconnect_proxies(ctx: &AppContext, key: &str, map: &mut ProxyConnectionsMap) {
    let Some(list) = map.remove(key) else {
        return;
    };
    let proxy = ctx.proxy();
    for connections in &list {
        let channel = connections.channel.as_str();
        for (uid, signal_key) in &connections.signals {
            if let Some(signal) = ctx.signals_of(uid).and_then(|s| s.signal(signal_key))
                && let Err(e) = proxy.disconnect_signal(channel, signal.as_ref())
            {
                warn!(channel = %channel, uid = %uid, error = %e, "Cannot disconnect signal");
            }
        }
        for (uid, slot_key) in &connections.slots {
            if let Some(slot) = ctx.slots_of(uid).and_then(|s| s.slot(slot_key))
                && let Err(e) = proxy.disconnect_slot(channel, slot.as_ref())
            {
                warn!(channel = %channel, uid = %uid, error = %e, "Cannot disconnect slot");
            }
        }
    }
    debug!(key = %key, channels = list.len(), "Disconnected proxies");
}

// ─── Services ───────────────────────────────────────────────────────────────

/// Builds the description of one `<service>` element.
///
/// Binding flags come from the element, then from its group, then from the
/// keys declared by the service type. Outputs are always optional.
pub fn parse_service(
    ctx: &AppContext,
    elem: &ConfigTree,
    err_head: &str,
) -> ParseResult<ServiceConfig> {
    let uid = required_attr(elem, err_head, "uid")?;
    let context = format!("{err_head}: service '{uid}'");
    let type_name = required_attr(elem, &context, "type")?;

    if elem.count("service") > 0 || elem.count("serviceList") > 0 {
        return Err(ParseError::NestedService(uid));
    }

    let mut config = ServiceConfig::new(uid, type_name);
    config.global_auto_connect = bool_attr(elem, &context, "autoConnect")?.unwrap_or(false);
    config.worker = optional_attr(elem, "worker").map(str::to_string);
    config.config = match optional_attr(elem, "config") {
        Some(name) => ctx
            .configs()
            .get(name)
            .ok_or_else(|| ParseError::UnknownConfig(name.to_string()))?,
        None => elem.clone(),
    };

    for access in [Access::In, Access::Out, Access::InOut] {
        for node in elem.equal_range(access.as_str()) {
            parse_binding(ctx, &mut config, node, access, &context)?;
        }
    }
    bind_object_properties(ctx, &mut config, elem);

    debug!(
        service = %config.uid,
        kind = %config.type_name,
        objects = config.objects.len(),
        "Parsed service configuration"
    );
    Ok(config)
}

fn parse_binding(
    ctx: &AppContext,
    config: &mut ServiceConfig,
    node: &ConfigTree,
    access: Access,
    context: &str,
) -> ParseResult<()> {
    let out = access == Access::Out;

    if let Some(group) = optional_attr(node, "group") {
        let props = ctx.key_props(&config.type_name, group).unwrap_or_default();
        let group_auto = bool_attr(node, context, "autoConnect")?;
        let group_optional = bool_attr(node, context, "optional")?;
        for (index, key_node) in node.equal_range("key").enumerate() {
            let uid = required_attr(key_node, context, "uid")?;
            let auto_connect = bool_attr(key_node, context, "autoConnect")?
                .or(group_auto)
                .unwrap_or(props.auto_connect);
            let optional = out
                || bool_attr(key_node, context, "optional")?
                    .or(group_optional)
                    .unwrap_or(props.optional);
            config.insert_object(ObjectServiceConfig {
                key: group_key(group, index),
                uid,
                access,
                auto_connect,
                optional,
            });
        }
        return Ok(());
    }

    let key = required_attr(node, context, "key")?;
    let uid = required_attr(node, context, "uid")?;
    let props = ctx.key_props(&config.type_name, &key).unwrap_or_default();
    let auto_connect = bool_attr(node, context, "autoConnect")?.unwrap_or(props.auto_connect);
    let optional = out || bool_attr(node, context, "optional")?.unwrap_or(props.optional);
    config.insert_object(ObjectServiceConfig {
        key,
        uid,
        access,
        auto_connect,
        optional,
    });
    Ok(())
}

/// Property values naming a registered object bind that object instead.
fn bind_object_properties(ctx: &AppContext, config: &mut ServiceConfig, elem: &ConfigTree) {
    let mut found = Vec::new();
    for properties in elem.equal_range("properties") {
        if let Some(attrs) = properties.get_child_optional(XMLATTR) {
            found.extend(attrs.children().map(|(k, v)| (k.to_string(), v.data().to_string())));
        }
        for property in properties.equal_range("property") {
            if let Some((k, v)) = property
                .get_child_optional(XMLATTR)
                .and_then(|attrs| attrs.children().next())
            {
                found.push((k.to_string(), v.data().to_string()));
            }
        }
    }

    for (key, value) in found {
        if config.object(&key).is_some() || !ctx.objects().contains(&value) {
            continue;
        }
        config.insert_object(ObjectServiceConfig {
            auto_connect: key != "from",
            key,
            uid: value,
            access: Access::InOut,
            optional: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::data::Integer;

    fn element(xml: &str) -> ConfigTree {
        let document = ConfigTree::from_xml(xml).unwrap();
        let (_, root) = document.children().next().unwrap();
        root.clone()
    }

    #[test]
    fn test_parse_connections() {
        let cfg = element(
            "<connect><signal>a/modified</signal><slot>b/update</slot><slot>c/update</slot></connect>",
        );
        let info = parse_connections(&cfg).unwrap();
        assert_eq!(info.signal, ("a".to_string(), "modified".to_string()));
        assert_eq!(info.slots.len(), 2);
        assert_eq!(info.slots[1].0, "c");
    }

    #[test]
    fn test_parse_connections_requires_one_signal() {
        let none = element("<connect><slot>b/update</slot></connect>");
        assert_eq!(parse_connections(&none), Err(ParseError::SignalCount(0)));

        let two = element("<connect><signal>a/x</signal><signal>a/y</signal></connect>");
        assert_eq!(parse_connections(&two), Err(ParseError::SignalCount(2)));
    }

    #[test]
    fn test_bad_entry() {
        let cfg = element("<connect><signal>nokey</signal></connect>");
        assert_eq!(
            parse_connections(&cfg),
            Err(ParseError::BadConnection("nokey".into()))
        );
    }

    #[test]
    fn test_parse_connections2_channel() {
        let named = element(r#"<connect channel="ch"><signal>a/s</signal></connect>"#);
        let parsed = parse_connections2(&named, "test", || "gen".into()).unwrap();
        assert_eq!(parsed.channel, "ch");
        assert_eq!(parsed.signals.len(), 1);

        let anonymous = element("<connect><slot>b/u</slot><slot>c/u</slot></connect>");
        let parsed = parse_connections2(&anonymous, "test", || "gen-1".into()).unwrap();
        assert_eq!(parsed.channel, "gen-1");
        assert!(parsed.signals.is_empty());
        assert_eq!(parsed.slots.len(), 2);
    }

    #[test]
    fn test_parse_group_binding() {
        let ctx = AppContext::new();
        let elem = element(
            r#"<service uid="srv" type="unknown::Type">
                 <in group="g"><key uid="A" autoConnect="true"/><key uid="B"/></in>
               </service>"#,
        );
        let config = parse_service(&ctx, &elem, "app").unwrap();

        assert_eq!(config.objects.len(), 2);
        let first = config.object("g[0]").unwrap();
        assert_eq!(first.uid, "A");
        assert!(first.auto_connect);
        let second = config.object("g[1]").unwrap();
        assert_eq!(second.uid, "B");
        assert!(!second.auto_connect);
    }

    #[test]
    fn test_parse_single_bindings() {
        let ctx = AppContext::new();
        let elem = element(
            r#"<service uid="srv" type="T" autoConnect="yes" worker="io">
                 <in key="image" uid="img" optional="true"/>
                 <inout key="mesh" uid="m" auto_connect="on"/>
                 <out key="result" uid="res"/>
               </service>"#,
        );
        let config = parse_service(&ctx, &elem, "app").unwrap();

        assert_eq!(config.uid, "srv");
        assert_eq!(config.type_name, "T");
        assert!(config.global_auto_connect);
        assert_eq!(config.worker.as_deref(), Some("io"));
        assert!(config.object("image").unwrap().optional);
        assert_eq!(config.object("mesh").unwrap().access, Access::InOut);
        assert!(config.object("mesh").unwrap().auto_connect);
        assert!(config.object("result").unwrap().optional);
        assert_eq!(config.config.attr("uid"), Some("srv"));
    }

    #[test]
    fn test_parse_service_errors() {
        let ctx = AppContext::new();

        let missing = element(r#"<service type="T"/>"#);
        assert!(matches!(
            parse_service(&ctx, &missing, "app"),
            Err(ParseError::MissingAttribute { attribute: "uid", .. })
        ));

        let nested = element(r#"<service uid="s" type="T"><service uid="t" type="T"/></service>"#);
        assert_eq!(
            parse_service(&ctx, &nested, "app").unwrap_err(),
            ParseError::NestedService("s".into())
        );

        let unknown = element(r#"<service uid="s" type="T" config="nope"/>"#);
        assert_eq!(
            parse_service(&ctx, &unknown, "app").unwrap_err(),
            ParseError::UnknownConfig("nope".into())
        );

        let bad_flag = element(r#"<service uid="s" type="T" autoConnect="maybe"/>"#);
        assert!(matches!(
            parse_service(&ctx, &bad_flag, "app"),
            Err(ParseError::Config(ConfigError::BadValue { .. }))
        ));
    }

    #[test]
    fn test_named_config_and_object_properties() {
        let ctx = AppContext::new();
        ctx.configs()
            .register("shared", element(r#"<config><threshold value="4"/></config>"#));
        ctx.objects().register("level", Arc::new(Integer::new(2)));

        let elem = element(
            r#"<service uid="s" type="T" config="shared">
                 <properties from="level" to="level" plain="12"/>
               </service>"#,
        );
        let config = parse_service(&ctx, &elem, "app").unwrap();

        assert!(config.config.get_child_optional("threshold").is_some());
        let from = config.object("from").unwrap();
        assert_eq!(from.access, Access::InOut);
        assert!(!from.auto_connect);
        assert!(config.object("to").unwrap().auto_connect);
        assert!(config.object("plain").is_none());
    }
}
