//! Text rendering of values and label graphs
//!
//! Output is deterministic for a given session: labels are listed in
//! breadth-first order from the entry and every entity prints with its
//! arena index.

use crate::label::LabelId;
use crate::session::Session;
use crate::types::{TYPE_BOOL, TYPE_NOTHING};
use crate::value::{sign_extend, Any, Payload};

pub fn format_value(session: &Session, value: &Any) -> String {
    if let Some(ty) = value.unknown_type() {
        return format!("?:{}", session.type_name(ty));
    }
    match &value.payload {
        Payload::Nothing => "none".to_string(),
        Payload::Int(bits) if value.ty == TYPE_BOOL => (*bits != 0).to_string(),
        Payload::Int(bits) => match session.types.integer_info(value.ty) {
            Some((width, true)) => format!("{}:{}", sign_extend(*bits, width), session.type_name(value.ty)),
            _ => format!("{}:{}", bits, session.type_name(value.ty)),
        },
        Payload::Real(bits) => format!("{:?}:{}", f64::from_bits(*bits), session.type_name(value.ty)),
        Payload::Pointer(address) => format!("{:#x}:{}", address, session.type_name(value.ty)),
        Payload::Symbol(sym) => format!("'{}", session.symbol_name(*sym)),
        Payload::Str(text) => format!("{:?}", text),
        Payload::Type(ty) => session.type_name(*ty).to_string(),
        Payload::Label(l) => format_label_ref(session, *l),
        Payload::Parameter(p) => format!("%{}.{}", session.param_name(*p), p.0),
        Payload::Closure(c) => {
            let closure = session.closure_data(*c);
            match closure.frame {
                Some(frame) => format!("closure({} {})", format_label_ref(session, closure.label), frame),
                None => format!("closure({})", format_label_ref(session, closure.label)),
            }
        }
        Payload::Frame(frame) => frame.to_string(),
        Payload::Builtin(b) => b.name().to_string(),
        Payload::Aggregate(values) => {
            let items: Vec<_> = values.iter().map(|v| format_value(session, v)).collect();
            format!("{{{}}}:{}", items.join(" "), session.type_name(value.ty))
        }
        Payload::Extern(sym) => format!("extern {}:{}", session.symbol_name(*sym), session.type_name(value.ty)),
    }
}

fn format_label_ref(session: &Session, label: LabelId) -> String {
    format!("@{}.{}", session.label_name(label), label.0)
}

/// One label: header with typed parameters, then its call
pub fn stream_label(session: &Session, label: LabelId) -> String {
    let data = session.label(label);
    let params: Vec<_> = data
        .params
        .iter()
        .map(|p| {
            let param = session.param(*p);
            let name = format!("%{}.{}", session.param_name(*p), p.0);
            let name = if param.vararg { format!("{}...", name) } else { name };
            format!("{}:{}", name, session.type_name(param.ty))
        })
        .collect();
    let args: Vec<_> = data
        .body
        .args
        .iter()
        .map(|arg| match arg.key {
            Some(key) => format!("{}={}", session.symbol_name(key), format_value(session, &arg.value)),
            None => format_value(session, &arg.value),
        })
        .collect();
    let mut markers = String::new();
    if data.is_template() {
        markers.push_str(" template");
    }
    if data.flags.reentrant {
        markers.push_str(" reentrant");
    }
    if !data.body.is_complete() {
        markers.push_str(" incomplete");
    }
    let returns = if session.return_type(label) == TYPE_NOTHING { " bb" } else { "" };
    format!(
        "{} ({}){}{}\n  {}({})\n",
        format_label_ref(session, label),
        params.join(" "),
        returns,
        markers,
        format_value(session, &data.body.enter),
        args.join(" ")
    )
}

/// Every label reachable from `entry`
pub fn stream_graph(session: &Session, entry: LabelId) -> String {
    session
        .reachable_labels(entry)
        .into_iter()
        .map(|label| stream_label(session, label))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::builtins::Builtin;
    use crate::types::{TYPE_I32, TYPE_I8};

    #[test]
    fn test_format_scalars() {
        let session = Session::default();
        assert_eq!(format_value(&session, &Any::i32(-3)), "-3:i32");
        assert_eq!(format_value(&session, &Any::int(TYPE_I8, 0xff)), "-1:i8");
        assert_eq!(format_value(&session, &Any::bool(true)), "true");
        assert_eq!(format_value(&session, &Any::nothing()), "none");
        assert_eq!(format_value(&session, &Any::unknown_of(TYPE_I32)), "?:i32");
        assert_eq!(format_value(&session, &Any::builtin(Builtin::Add)), "add");
    }

    #[test]
    fn test_stream_graph_lists_reachable_labels() {
        let mut session = Session::default();
        let mut b = GraphBuilder::new(&mut session);
        let f = b.function("f", &["x"]);
        let k = b.block("k", &["v"]);
        let x = b.param(f, 1);
        b.call(f, Any::builtin(Builtin::Add), Any::label(k), vec![x.clone(), x]);
        b.jump(k, Any::builtin(Builtin::Unreachable), vec![]);
        let text = stream_graph(&session, f);
        assert!(text.starts_with("@f."));
        assert!(text.contains("@k."));
        assert!(text.contains("add("));
        assert_eq!(text, stream_graph(&session, f));
    }
}
