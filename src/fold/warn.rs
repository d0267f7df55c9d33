pub struct WarnEvent<'a> {
    pub code: &'a str,
    pub stage: &'a str,
    pub action: &'a str,
    pub request: &'a str,
    pub target: &'a str,
    pub retry: &'a str,
    pub reason: &'a str,
    pub err: &'a str,
}

fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_ascii_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if ch.is_ascii_graphic() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn render(event: &WarnEvent<'_>) -> String {
    format!(
        "TIMEFOLD_WARN code={} stage={} action={} request={} target={} retry={} reason={} err={}",
        sanitize_value(event.code),
        sanitize_value(event.stage),
        sanitize_value(event.action),
        sanitize_value(event.request),
        sanitize_value(event.target),
        sanitize_value(event.retry),
        sanitize_value(event.reason),
        sanitize_value(event.err),
    )
}

pub fn emit(event: WarnEvent<'_>) {
    eprintln!("{}", render(&event));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_value_rewrites_whitespace() {
        assert_eq!(sanitize_value("a b\tc"), "a_b_c");
    }

    #[test]
    fn sanitize_value_falls_back_for_empty() {
        assert_eq!(sanitize_value("   "), "na");
    }

    #[test]
    fn render_keeps_field_order() {
        let line = render(&WarnEvent {
            code: "E006_QUARANTINED",
            stage: "processor",
            action: "quarantine",
            request: "0001_abc.json",
            target: "/tmp/backup",
            retry: "manual",
            reason: "max failures",
            err: "",
        });
        assert_eq!(
            line,
            "TIMEFOLD_WARN code=E006_QUARANTINED stage=processor action=quarantine request=0001_abc.json target=/tmp/backup retry=manual reason=max_failures err=na"
        );
    }
}
