use facemood_core::NamePrompt;
use std::io::{BufRead, Write};

/// Asks on the terminal for the name of an unrecognized face.
pub struct StdinPrompt;

impl NamePrompt for StdinPrompt {
    fn ask_name(&mut self, image: &str) -> Option<String> {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "New face detected in {image}! Enter person name (blank to skip): ");
        let _ = stderr.flush();

        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()).filter(|n| !n.is_empty()),
        }
    }
}

/// Uses a name given on the command line, falling back to the terminal.
pub struct PresetPrompt {
    pub name: Option<String>,
    pub interactive: bool,
}

impl NamePrompt for PresetPrompt {
    fn ask_name(&mut self, image: &str) -> Option<String> {
        match self.name.take() {
            Some(name) => Some(name),
            None if self.interactive => StdinPrompt.ask_name(image),
            None => {
                tracing::info!(image, "unknown face and prompting disabled");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_name_used_once() {
        let mut prompt = PresetPrompt { name: Some("Bob".into()), interactive: false };
        assert_eq!(prompt.ask_name("a.jpg").as_deref(), Some("Bob"));
        assert_eq!(prompt.ask_name("b.jpg"), None);
    }
}
