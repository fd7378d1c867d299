use roxmltree::{Document, Node};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A WS-Management reply converted into a JSON tree.
///
/// Element local names become keys, repeated siblings become arrays, leaf
/// elements become strings, and attributes appear as `@Name` keys next to a
/// `#text` key.
#[derive(Debug, Clone, PartialEq)]
pub struct WsmanResponse {
	pub header: Value,
	pub body: Value,
}

/// SOAP fault carried by a `400` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
	/// Subcode without its namespace prefix, e.g. `AlreadyExists`.
	pub subcode: Option<String>,
	pub reason: String,
	pub detail: Option<String>,
}

impl WsmanResponse {
	pub fn parse(xml: &str) -> Result<Self> {
		let doc = Document::parse(xml.trim()).map_err(|e| Error::Xml(e.to_string()))?;
		let root = doc.root_element();
		if root.tag_name().name() != "Envelope" {
			return Err(Error::Xml(format!("expected Envelope, found {}", root.tag_name().name())));
		}

		let header = child(root, "Header").map(element_to_json).unwrap_or(Value::Null);
		let body = child(root, "Body")
			.map(element_to_json)
			.ok_or_else(|| Error::Xml("envelope has no Body".into()))?;
		Ok(Self { header, body })
	}

	/// `RelatesTo` header, echoing the request's `MessageID`.
	pub fn relates_to(&self) -> Option<&str> {
		self.header.get("RelatesTo").and_then(text_of)
	}

	/// Instance returned by a Get, keyed by class name.
	pub fn instance(&self, class: &str) -> Option<&Map<String, Value>> {
		self.body.get(class).and_then(Value::as_object)
	}

	/// `ReturnValue` of an invoked method.
	pub fn return_value(&self, method: &str) -> Option<i64> {
		self.output(method).and_then(|out| out.get("ReturnValue")).and_then(text_of).and_then(|v| v.parse().ok())
	}

	/// `{method}_OUTPUT` element of an invoked method.
	pub fn output(&self, method: &str) -> Option<&Value> {
		self.body.get(format!("{method}_OUTPUT").as_str())
	}

	pub fn enumeration_context(&self) -> Option<&str> {
		self.body.get("EnumerateResponse").and_then(|e| e.get("EnumerationContext")).and_then(text_of)
	}

	/// Instances of `class` in a Pull reply; always a list.
	pub fn pulled(&self, class: &str) -> Vec<&Map<String, Value>> {
		match self.body.get("PullResponse").and_then(|p| p.get("Items")).and_then(|i| i.get(class)) {
			Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
			Some(Value::Object(item)) => vec![item],
			_ => Vec::new(),
		}
	}

	pub fn fault(&self) -> Option<Fault> {
		let fault = self.body.get("Fault")?;
		let subcode = fault
			.get("Code")
			.and_then(|c| c.get("Subcode"))
			.and_then(|s| s.get("Value"))
			.and_then(text_of)
			.map(|v| v.rsplit(':').next().unwrap_or(v).to_string());
		let reason = fault.get("Reason").and_then(|r| r.get("Text")).and_then(text_of).unwrap_or_default().to_string();
		let detail = fault.get("Detail").and_then(|d| match d {
			Value::Object(map) => map.values().find_map(text_of).map(str::to_string),
			other => text_of(other).map(str::to_string),
		});
		Some(Fault { subcode, reason, detail })
	}
}

/// Selector value inside an endpoint reference (`ReferenceParameters.SelectorSet`).
pub fn selector_value<'a>(reference: &'a Value, name: &str) -> Option<&'a str> {
	let selectors = reference.get("ReferenceParameters")?.get("SelectorSet")?.get("Selector")?;
	let matches = |s: &'a Value| -> Option<&'a str> {
		if s.get("@Name").and_then(Value::as_str) == Some(name) { s.get("#text").and_then(Value::as_str) } else { None }
	};
	match selectors {
		Value::Array(items) => items.iter().find_map(matches),
		single => matches(single),
	}
}

/// Text of a leaf, whether it was rendered as a plain string or with attributes.
fn text_of(value: &Value) -> Option<&str> {
	match value {
		Value::String(s) => Some(s),
		Value::Object(map) => map.get("#text").and_then(Value::as_str),
		_ => None,
	}
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
	node.children().find(|n| n.is_element() && n.tag_name().name() == name)
}

fn element_to_json(node: Node<'_, '_>) -> Value {
	let mut map = Map::new();
	for attr in node.attributes() {
		map.insert(format!("@{}", attr.name()), Value::String(attr.value().to_string()));
	}

	let elements: Vec<Node<'_, '_>> = node.children().filter(|n| n.is_element()).collect();
	if elements.is_empty() {
		let text: String = node.children().filter(|n| n.is_text()).filter_map(|n| n.text()).collect();
		let text = text.trim().to_string();
		if map.is_empty() {
			return Value::String(text);
		}
		map.insert("#text".into(), Value::String(text));
		return Value::Object(map);
	}

	for element in elements {
		let key = element.tag_name().name().to_string();
		let value = element_to_json(element);
		match map.get_mut(&key) {
			Some(Value::Array(items)) => items.push(value),
			Some(existing) => {
				let first = existing.take();
				*existing = Value::Array(vec![first, value]);
			}
			None => {
				map.insert(key, value);
			}
		}
	}
	Value::Object(map)
}
