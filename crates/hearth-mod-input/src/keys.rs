use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Error, Result};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// A key plus required modifiers, written like `q`, `esc` or `ctrl+c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBinding {
    pub code: KeyCode,
    pub modifiers: KeyModifiers,
}

impl KeyBinding {
    /// Shift on a character key is folded into the character, so
    /// `shift+q` and `Q` are the same binding.
    pub fn new(code: KeyCode, modifiers: KeyModifiers) -> Self {
        match code {
            KeyCode::Char(c) if modifiers.contains(KeyModifiers::SHIFT) => Self {
                code: KeyCode::Char(c.to_ascii_uppercase()),
                modifiers: modifiers - KeyModifiers::SHIFT,
            },
            _ => Self { code, modifiers },
        }
    }

    /// Shift is ignored for character keys since it is already reflected in
    /// the character itself.
    pub fn matches(&self, event: &KeyEvent) -> bool {
        let relevant = match event.code {
            KeyCode::Char(_) => event.modifiers - KeyModifiers::SHIFT,
            _ => event.modifiers,
        };
        event.code == self.code && relevant == self.modifiers
    }

    pub fn to_event(self) -> KeyEvent {
        KeyEvent::new(self.code, self.modifiers)
    }
}

fn parse_code(name: &str) -> Result<KeyCode> {
    let lower = name.to_ascii_lowercase();
    let code = match lower.as_str() {
        "esc" | "escape" => KeyCode::Esc,
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "space" => KeyCode::Char(' '),
        "backspace" => KeyCode::Backspace,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        f if f.len() > 1 && f.starts_with('f') => {
            let n: u8 = f[1..]
                .parse()
                .map_err(|_| anyhow!("unknown key {name:?}"))?;
            if !(1..=12).contains(&n) {
                bail!("function key out of range: {name:?}");
            }
            KeyCode::F(n)
        }
        _ => {
            let mut chars = name.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyCode::Char(c),
                _ => bail!("unknown key {name:?}"),
            }
        }
    };
    Ok(code)
}

impl FromStr for KeyBinding {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            bail!("empty key binding");
        }
        // A lone "+" is the plus key, not a separator.
        let (mods, key) = match spec.rsplit_once('+') {
            Some((mods, "")) if mods.ends_with('+') || mods.is_empty() => {
                (mods.trim_end_matches('+'), "+")
            }
            Some((mods, key)) => (mods, key),
            None => ("", spec),
        };

        let mut modifiers = KeyModifiers::NONE;
        for part in mods.split('+').filter(|p| !p.is_empty()) {
            modifiers |= match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => KeyModifiers::CONTROL,
                "alt" => KeyModifiers::ALT,
                "shift" => KeyModifiers::SHIFT,
                other => bail!("unknown modifier {other:?} in {spec:?}"),
            };
        }
        Ok(Self::new(parse_code(key)?, modifiers))
    }
}

impl fmt::Display for KeyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, label) in [
            (KeyModifiers::CONTROL, "ctrl+"),
            (KeyModifiers::ALT, "alt+"),
            (KeyModifiers::SHIFT, "shift+"),
        ] {
            if self.modifiers.contains(flag) {
                f.write_str(label)?;
            }
        }
        match self.code {
            KeyCode::Esc => f.write_str("esc"),
            KeyCode::Enter => f.write_str("enter"),
            KeyCode::Tab => f.write_str("tab"),
            KeyCode::Char(' ') => f.write_str("space"),
            KeyCode::Backspace => f.write_str("backspace"),
            KeyCode::Up => f.write_str("up"),
            KeyCode::Down => f.write_str("down"),
            KeyCode::Left => f.write_str("left"),
            KeyCode::Right => f.write_str("right"),
            KeyCode::F(n) => write!(f, "f{n}"),
            KeyCode::Char(c) => write!(f, "{c}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Describe a key event the way bindings are written.
pub fn describe(event: &KeyEvent) -> String {
    let modifiers = match event.code {
        KeyCode::Char(_) => event.modifiers - KeyModifiers::SHIFT,
        _ => event.modifiers,
    };
    KeyBinding::new(event.code, modifiers).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_bindings() {
        assert_eq!("q".parse::<KeyBinding>().unwrap().code, KeyCode::Char('q'));
        assert_eq!("Esc".parse::<KeyBinding>().unwrap().code, KeyCode::Esc);
        assert_eq!("f5".parse::<KeyBinding>().unwrap().code, KeyCode::F(5));

        let ctrl_c: KeyBinding = "ctrl+c".parse().unwrap();
        assert_eq!(ctrl_c.code, KeyCode::Char('c'));
        assert_eq!(ctrl_c.modifiers, KeyModifiers::CONTROL);

        let plus: KeyBinding = "ctrl++".parse().unwrap();
        assert_eq!(plus.code, KeyCode::Char('+'));
        assert_eq!(plus.modifiers, KeyModifiers::CONTROL);
        assert_eq!("+".parse::<KeyBinding>().unwrap().code, KeyCode::Char('+'));
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<KeyBinding>().is_err());
        assert!("hyper+q".parse::<KeyBinding>().is_err());
        assert!("f13".parse::<KeyBinding>().is_err());
        assert!("quit".parse::<KeyBinding>().is_err());
    }

    #[test]
    fn display_matches_parse_input() {
        for spec in ["q", "esc", "ctrl+c", "alt+enter", "f12", "space"] {
            let binding: KeyBinding = spec.parse().unwrap();
            assert_eq!(binding.to_string(), spec);
        }
    }

    #[test]
    fn matching_ignores_shift_on_characters() {
        let q: KeyBinding = "Q".parse().unwrap();
        assert!(q.matches(&KeyEvent::new(KeyCode::Char('Q'), KeyModifiers::SHIFT)));
        assert!(!q.matches(&KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)));

        let ctrl_c: KeyBinding = "ctrl+c".parse().unwrap();
        assert!(ctrl_c.matches(&ctrl_c.to_event()));
        assert!(!ctrl_c.matches(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE)));
    }

    #[test]
    fn shift_on_a_character_folds_into_the_character() {
        let shift_q: KeyBinding = "shift+q".parse().unwrap();
        assert_eq!(shift_q, "Q".parse::<KeyBinding>().unwrap());
        assert_eq!(shift_q.to_string(), "Q");
        assert!(shift_q.matches(&KeyEvent::new(KeyCode::Char('Q'), KeyModifiers::SHIFT)));
        assert!(!shift_q.matches(&KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)));

        let ctrl_shift_x: KeyBinding = "ctrl+shift+x".parse().unwrap();
        assert_eq!(ctrl_shift_x.code, KeyCode::Char('X'));
        assert_eq!(ctrl_shift_x.modifiers, KeyModifiers::CONTROL);
        assert!(ctrl_shift_x.matches(&KeyEvent::new(
            KeyCode::Char('X'),
            KeyModifiers::CONTROL | KeyModifiers::SHIFT
        )));

        let shift_tab: KeyBinding = "shift+tab".parse().unwrap();
        assert_eq!(shift_tab.modifiers, KeyModifiers::SHIFT);
        assert_eq!(shift_tab.to_string(), "shift+tab");
    }

    #[test]
    fn describe_events() {
        let event = KeyEvent::new(KeyCode::Char('x'), KeyModifiers::CONTROL);
        assert_eq!(describe(&event), "ctrl+x");
        assert_eq!(describe(&KeyEvent::new(KeyCode::Up, KeyModifiers::NONE)), "up");
    }
}
