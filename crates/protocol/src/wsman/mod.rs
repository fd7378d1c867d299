//! WS-Management SOAP envelopes.
//!
//! [`Envelope`] renders the request side; [`WsmanResponse`] reads replies
//! into a JSON tree. Class-specific invocations live in [`amt`] and [`ips`].

pub mod amt;
pub mod ips;
mod response;

pub use response::{Fault, WsmanResponse, selector_value};

use serde_json::{Map, Value};

pub const AMT_SCHEMA: &str = "http://intel.com/wbem/wscim/1/amt-schema/1/";
pub const IPS_SCHEMA: &str = "http://intel.com/wbem/wscim/1/ips-schema/1/";
pub const CIM_SCHEMA: &str = "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/";

const ADDRESSING: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
const ANONYMOUS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";
const TRANSFER: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer";
const ENUMERATION: &str = "http://schemas.xmlsoap.org/ws/2004/09/enumeration";
const WSMAN: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";

/// Resource URI for a class, chosen by its schema prefix.
pub fn resource_uri(class: &str) -> String {
	let schema = if class.starts_with("AMT_") {
		AMT_SCHEMA
	} else if class.starts_with("IPS_") {
		IPS_SCHEMA
	} else {
		CIM_SCHEMA
	};
	format!("{schema}{class}")
}

/// A method parameter or property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
	Text(String),
	/// Repeated element, one per value.
	Many(Vec<String>),
	Reference(EndpointReference),
}

impl Param {
	pub fn text(value: impl ToString) -> Self {
		Param::Text(value.to_string())
	}

	/// Converts a pulled JSON property back into a parameter. Nested objects
	/// other than references are not representable and yield `None`.
	pub fn from_json(value: &Value) -> Option<Self> {
		match value {
			Value::String(s) => Some(Param::Text(s.clone())),
			Value::Bool(b) => Some(Param::Text(b.to_string())),
			Value::Number(n) => Some(Param::Text(n.to_string())),
			Value::Array(items) => Some(Param::Many(items.iter().filter_map(scalar_text).collect())),
			Value::Null | Value::Object(_) => None,
		}
	}
}

fn scalar_text(value: &Value) -> Option<String> {
	match value {
		Value::String(s) => Some(s.clone()),
		Value::Bool(b) => Some(b.to_string()),
		Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

/// Endpoint reference to an instance on the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointReference {
	pub resource_uri: String,
	pub selectors: Vec<(String, String)>,
}

impl EndpointReference {
	pub fn new(class: &str, selector: &str, value: impl Into<String>) -> Self {
		Self {
			resource_uri: resource_uri(class),
			selectors: vec![(selector.to_string(), value.into())],
		}
	}
}

/// One WS-Management request, rendered with a message id at send time.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
	action: String,
	resource_uri: String,
	selectors: Vec<(String, String)>,
	body: String,
}

impl Envelope {
	fn new(action: String, class: &str, body: String) -> Self {
		Self {
			action,
			resource_uri: resource_uri(class),
			selectors: Vec::new(),
			body,
		}
	}

	pub fn get(class: &str) -> Self {
		Self::new(format!("{TRANSFER}/Get"), class, String::new())
	}

	pub fn enumerate(class: &str) -> Self {
		Self::new(format!("{ENUMERATION}/Enumerate"), class, format!("<Enumerate xmlns=\"{ENUMERATION}\" />"))
	}

	pub fn pull(class: &str, context: &str) -> Self {
		let body = format!(
			"<Pull xmlns=\"{ENUMERATION}\"><EnumerationContext>{}</EnumerationContext><MaxElements>999</MaxElements><MaxCharacters>99999</MaxCharacters></Pull>",
			escape(context)
		);
		Self::new(format!("{ENUMERATION}/Pull"), class, body)
	}

	/// Replaces an instance with the given properties (in schema order).
	pub fn put(class: &str, properties: &[(String, Param)]) -> Self {
		let body = instance_body(class, properties);
		Self::new(format!("{TRANSFER}/Put"), class, body)
	}

	pub fn create(class: &str, properties: &[(String, Param)]) -> Self {
		let body = instance_body(class, properties);
		Self::new(format!("{TRANSFER}/Create"), class, body)
	}

	/// Invokes a class method.
	pub fn invoke(class: &str, method: &str, params: &[(&str, Param)]) -> Self {
		let uri = resource_uri(class);
		let mut body = format!("<h:{method}_INPUT xmlns:h=\"{uri}\">");
		for (name, value) in params {
			render_param(&mut body, name, value);
		}
		body.push_str(&format!("</h:{method}_INPUT>"));
		Self::new(format!("{uri}/{method}"), class, body)
	}

	pub fn with_selector(mut self, name: &str, value: impl Into<String>) -> Self {
		self.selectors.push((name.to_string(), value.into()));
		self
	}

	pub fn action(&self) -> &str {
		&self.action
	}

	pub fn resource_uri(&self) -> &str {
		&self.resource_uri
	}

	pub fn to_xml(&self, message_id: &str) -> String {
		let mut xml = String::with_capacity(self.body.len() + 1024);
		xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>");
		xml.push_str(&format!(
			"<Envelope xmlns=\"http://www.w3.org/2003/05/soap-envelope\" xmlns:a=\"{ADDRESSING}\" xmlns:w=\"{WSMAN}\">"
		));
		xml.push_str("<Header>");
		xml.push_str(&format!("<a:Action>{}</a:Action>", escape(&self.action)));
		xml.push_str("<a:To>/wsman</a:To>");
		xml.push_str(&format!("<w:ResourceURI>{}</w:ResourceURI>", escape(&self.resource_uri)));
		xml.push_str(&format!("<a:MessageID>{}</a:MessageID>", escape(message_id)));
		xml.push_str(&format!("<a:ReplyTo><a:Address>{ANONYMOUS}</a:Address></a:ReplyTo>"));
		xml.push_str("<w:OperationTimeout>PT60S</w:OperationTimeout>");
		if !self.selectors.is_empty() {
			xml.push_str("<w:SelectorSet>");
			for (name, value) in &self.selectors {
				xml.push_str(&format!("<w:Selector Name=\"{}\">{}</w:Selector>", escape(name), escape(value)));
			}
			xml.push_str("</w:SelectorSet>");
		}
		xml.push_str("</Header>");
		if self.body.is_empty() {
			xml.push_str("<Body />");
		} else {
			xml.push_str("<Body>");
			xml.push_str(&self.body);
			xml.push_str("</Body>");
		}
		xml.push_str("</Envelope>");
		xml
	}
}

/// Turns a pulled instance into ordered properties for a [`Envelope::put`].
pub fn properties_from_json(instance: &Map<String, Value>) -> Vec<(String, Param)> {
	instance
		.iter()
		.filter(|(name, _)| !name.starts_with('@') && !name.starts_with('#'))
		.filter_map(|(name, value)| Param::from_json(value).map(|p| (name.clone(), p)))
		.collect()
}

fn instance_body(class: &str, properties: &[(String, Param)]) -> String {
	let uri = resource_uri(class);
	let mut body = format!("<h:{class} xmlns:h=\"{uri}\">");
	for (name, value) in properties {
		render_param(&mut body, name, value);
	}
	body.push_str(&format!("</h:{class}>"));
	body
}

fn render_param(out: &mut String, name: &str, value: &Param) {
	match value {
		Param::Text(text) => out.push_str(&format!("<h:{name}>{}</h:{name}>", escape(text))),
		Param::Many(values) => {
			for v in values {
				out.push_str(&format!("<h:{name}>{}</h:{name}>", escape(v)));
			}
		}
		Param::Reference(reference) => {
			out.push_str(&format!("<h:{name}><a:Address>/wsman</a:Address><a:ReferenceParameters>"));
			out.push_str(&format!("<w:ResourceURI>{}</w:ResourceURI><w:SelectorSet>", escape(&reference.resource_uri)));
			for (selector, v) in &reference.selectors {
				out.push_str(&format!("<w:Selector Name=\"{}\">{}</w:Selector>", escape(selector), escape(v)));
			}
			out.push_str(&format!("</w:SelectorSet></a:ReferenceParameters></h:{name}>"));
		}
	}
}

/// Escapes XML text and attribute content.
pub fn escape(input: &str) -> String {
	let mut out = String::with_capacity(input.len());
	for c in input.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			'\'' => out.push_str("&apos;"),
			c => out.push(c),
		}
	}
	out
}
