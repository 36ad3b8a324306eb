use std::fmt;

use serde_json::{Map, Number, Value};

// === Emitter === //

/// Structured-dump sink. Dumps write named fields into the currently open
/// section; sections nest through `open_object`/`open_array` and a matching
/// `close_section`. Field names are ignored inside arrays.
pub trait Emitter {
    fn open_object(&mut self, name: &str);
    fn open_array(&mut self, name: &str);
    fn close_section(&mut self);
    fn dump_int(&mut self, name: &str, value: i64);
    fn dump_float(&mut self, name: &str, value: f64);
    fn dump_string(&mut self, name: &str, value: &str);
}

impl<E: Emitter + ?Sized> Emitter for &mut E {
    fn open_object(&mut self, name: &str) {
        (**self).open_object(name)
    }

    fn open_array(&mut self, name: &str) {
        (**self).open_array(name)
    }

    fn close_section(&mut self) {
        (**self).close_section()
    }

    fn dump_int(&mut self, name: &str, value: i64) {
        (**self).dump_int(name, value)
    }

    fn dump_float(&mut self, name: &str, value: f64) {
        (**self).dump_float(name, value)
    }

    fn dump_string(&mut self, name: &str, value: &str) {
        (**self).dump_string(name, value)
    }
}

// === StreamDumper === //

/// `fmt::Write` adapter for stream-style fields: text written here becomes
/// a single string field when the dumper drops.
pub struct StreamDumper<'a> {
    emitter: &'a mut dyn Emitter,
    name: String,
    buf: String,
}

impl<'a> StreamDumper<'a> {
    pub fn new(emitter: &'a mut dyn Emitter, name: &str) -> Self {
        Self {
            emitter,
            name: name.to_owned(),
            buf: String::new(),
        }
    }
}

impl fmt::Write for StreamDumper<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buf.push_str(s);
        Ok(())
    }
}

impl Drop for StreamDumper<'_> {
    fn drop(&mut self) {
        self.emitter.dump_string(&self.name, &self.buf);
    }
}

// === JsonEmitter === //

enum Frame {
    Object { name: String, map: Map<String, Value> },
    Array { name: String, items: Vec<Value> },
}

/// Emitter backend assembling a `serde_json::Value` tree. The root is an
/// implicit object; `into_value` closes any sections left open.
#[derive(Default)]
pub struct JsonEmitter {
    root: Map<String, Value>,
    stack: Vec<Frame>,
}

impl fmt::Debug for JsonEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonEmitter")
            .field("depth", &self.stack.len())
            .finish_non_exhaustive()
    }
}

impl JsonEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&mut self, name: &str, value: Value) {
        match self.stack.last_mut() {
            Some(Frame::Object { map, .. }) => {
                map.insert(name.to_owned(), value);
            }
            Some(Frame::Array { items, .. }) => items.push(value),
            None => {
                self.root.insert(name.to_owned(), value);
            }
        }
    }

    pub fn into_value(mut self) -> Value {
        while !self.stack.is_empty() {
            self.close_section();
        }
        Value::Object(self.root)
    }
}

impl Emitter for JsonEmitter {
    fn open_object(&mut self, name: &str) {
        self.stack.push(Frame::Object {
            name: name.to_owned(),
            map: Map::new(),
        });
    }

    fn open_array(&mut self, name: &str) {
        self.stack.push(Frame::Array {
            name: name.to_owned(),
            items: Vec::new(),
        });
    }

    fn close_section(&mut self) {
        let Some(frame) = self.stack.pop() else {
            debug_assert!(false, "close_section without an open section");
            return;
        };

        let (name, value) = match frame {
            Frame::Object { name, map } => (name, Value::Object(map)),
            Frame::Array { name, items } => (name, Value::Array(items)),
        };
        self.put(&name, value);
    }

    fn dump_int(&mut self, name: &str, value: i64) {
        self.put(name, Value::from(value));
    }

    fn dump_float(&mut self, name: &str, value: f64) {
        let value = Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null);
        self.put(name, value);
    }

    fn dump_string(&mut self, name: &str, value: &str) {
        self.put(name, Value::from(value));
    }
}

// === Tests === //
