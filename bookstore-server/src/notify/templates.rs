//! Email templates
//!
//! Every template renders from a JSON data object (the same object stored
//! in the notification outbox), so a queued notification can be re-rendered
//! on redelivery without touching the domain tables.

use super::NotifyError;
use serde_json::Value;

pub const ORDER_CONFIRMATION: &str = "order_confirmation";
pub const EMAIL_VERIFICATION: &str = "email_verification";
pub const PROMOTION_REMOVED: &str = "promotion_removed";

/// A rendered email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub subject: String,
    pub body_html: String,
}

pub fn render(template: &str, data: &Value) -> Result<Email, NotifyError> {
    match template {
        ORDER_CONFIRMATION => Ok(order_confirmation(data)),
        EMAIL_VERIFICATION => Ok(email_verification(data)),
        PROMOTION_REMOVED => Ok(promotion_removed(data)),
        other => Err(NotifyError::UnknownTemplate(other.to_string())),
    }
}

fn field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn order_confirmation(data: &Value) -> Email {
    let number = escape(field(data, "order_number"));
    let name = escape(field(data, "name"));
    let total = escape(field(data, "total"));

    let lines: String = data
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let qty = item.get("quantity").and_then(Value::as_i64).unwrap_or_default();
                    format!(
                        "<tr><td>{}</td><td>{qty}</td><td>{}</td></tr>",
                        escape(field(item, "title")),
                        escape(field(item, "unit_price")),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    Email {
        subject: format!("Order {} confirmed", field(data, "order_number")),
        body_html: format!(
            "<p>Hi {name},</p>\
             <p>Thanks for your order <strong>{number}</strong>.</p>\
             <table><tr><th>Book</th><th>Qty</th><th>Price</th></tr>{lines}</table>\
             <p>Total: <strong>{total}</strong></p>"
        ),
    }
}

fn email_verification(data: &Value) -> Email {
    let name = escape(field(data, "name"));
    let token = escape(field(data, "token"));
    Email {
        subject: "Verify your email address".to_string(),
        body_html: format!(
            "<p>Hi {name},</p>\
             <p>Your verification code is <strong>{token}</strong>.</p>\
             <p>The code is valid for 24 hours.</p>"
        ),
    }
}

fn promotion_removed(data: &Value) -> Email {
    let code = escape(field(data, "code"));
    let reason = escape(field(data, "reason"));
    Email {
        subject: "A promotion was removed from your cart".to_string(),
        body_html: format!(
            "<p>The promotion <strong>{code}</strong> was removed from your cart: {reason}.</p>\
             <p>Your items are still waiting for you.</p>"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_confirmation_lists_lines() {
        let email = render(
            ORDER_CONFIRMATION,
            &json!({
                "order_number": "BK-20260101-000001",
                "name": "Lan",
                "total": "150000",
                "items": [{"title": "Dune", "quantity": 2, "unit_price": "75000"}],
            }),
        )
        .unwrap();
        assert_eq!(email.subject, "Order BK-20260101-000001 confirmed");
        assert!(email.body_html.contains("<td>Dune</td><td>2</td><td>75000</td>"));
        assert!(email.body_html.contains("150000"));
    }

    #[test]
    fn values_are_html_escaped() {
        let email = render(PROMOTION_REMOVED, &json!({"code": "<b>X</b>", "reason": "a & b"})).unwrap();
        assert!(email.body_html.contains("&lt;b&gt;X&lt;/b&gt;"));
        assert!(email.body_html.contains("a &amp; b"));
    }

    #[test]
    fn unknown_template_is_rejected() {
        assert!(matches!(
            render("weekly_digest", &json!({})),
            Err(NotifyError::UnknownTemplate(t)) if t == "weekly_digest"
        ));
    }
}
