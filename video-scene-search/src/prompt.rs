use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};

use crate::error::{Result, SearchError};

/// 交互式单行输入
pub trait LinePrompt {
    /// 读取一行输入（已去掉首尾空白）；`vocabulary` 为 Tab 补全候选，可为空。
    /// Ctrl-C / Ctrl-D 返回 `UserAbort`
    fn read_line(&mut self, prompt: &str, vocabulary: &[String]) -> Result<String>;
}

/// 按当前单词前缀补全
#[derive(Default)]
pub struct VocabularyHelper {
    vocabulary: Vec<String>,
}

impl VocabularyHelper {
    /// 返回当前单词的起始位置与候选词
    fn candidates(&self, line: &str, pos: usize) -> (usize, Vec<String>) {
        let head = &line[..pos];
        let start = head
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        let prefix = head[start..].to_lowercase();

        let words = self
            .vocabulary
            .iter()
            .filter(|word| word.starts_with(&prefix))
            .cloned()
            .collect();
        (start, words)
    }
}

impl Completer for VocabularyHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> rustyline::Result<(usize, Vec<Pair>)> {
        let (start, words) = self.candidates(line, pos);
        let pairs = words
            .into_iter()
            .map(|word| Pair {
                display: word.clone(),
                replacement: word,
            })
            .collect();
        Ok((start, pairs))
    }
}

impl Hinter for VocabularyHelper {
    type Hint = String;
}

impl Highlighter for VocabularyHelper {}

impl Validator for VocabularyHelper {}

impl Helper for VocabularyHelper {}

/// 基于 rustyline 的终端输入
pub struct RustylinePrompt {
    editor: Editor<VocabularyHelper, DefaultHistory>,
}

impl RustylinePrompt {
    pub fn new() -> Result<Self> {
        let mut editor = Editor::<VocabularyHelper, DefaultHistory>::new()
            .map_err(|e| SearchError::CollaboratorInit(format!("初始化终端输入失败: {}", e)))?;
        editor.set_helper(Some(VocabularyHelper::default()));
        Ok(Self { editor })
    }
}

impl LinePrompt for RustylinePrompt {
    fn read_line(&mut self, prompt: &str, vocabulary: &[String]) -> Result<String> {
        if let Some(helper) = self.editor.helper_mut() {
            helper.vocabulary = vocabulary.to_vec();
        }

        match self.editor.readline(prompt) {
            Ok(line) => {
                let line = line.trim().to_string();
                if !line.is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Ok(line)
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Err(SearchError::UserAbort),
            Err(ReadlineError::Io(e)) => Err(SearchError::Io(e)),
            Err(e) => Err(SearchError::Io(std::io::Error::other(e.to_string()))),
        }
    }
}

/// 按脚本返回输入的假终端；脚本耗尽视为 Ctrl-D
#[cfg(test)]
pub(crate) struct ScriptedPrompt {
    answers: std::collections::VecDeque<String>,
    pub prompts: Vec<(String, Vec<String>)>,
}

#[cfg(test)]
impl ScriptedPrompt {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| a.to_string()).collect(),
            prompts: Vec::new(),
        }
    }
}

#[cfg(test)]
impl LinePrompt for ScriptedPrompt {
    fn read_line(&mut self, prompt: &str, vocabulary: &[String]) -> Result<String> {
        self.prompts.push((prompt.to_string(), vocabulary.to_vec()));
        self.answers
            .pop_front()
            .map(|a| a.trim().to_string())
            .ok_or(SearchError::UserAbort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper(words: &[&str]) -> VocabularyHelper {
        VocabularyHelper {
            vocabulary: words.iter().map(|w| w.to_string()).collect(),
        }
    }

    #[test]
    fn test_completes_current_word() {
        let helper = helper(&["car", "cat", "house", "red"]);

        assert_eq!(helper.candidates("ca", 2), (0, vec!["car".to_string(), "cat".to_string()]));
        assert_eq!(helper.candidates("red Ho", 6), (4, vec!["house".to_string()]));
        assert_eq!(helper.candidates("red ", 4).1.len(), 4);
        assert!(helper.candidates("xyz", 3).1.is_empty());
    }

    #[test]
    fn test_scripted_prompt_aborts_when_exhausted() {
        let mut prompt = ScriptedPrompt::new(&[" car "]);
        assert_eq!(prompt.read_line("> ", &[]).unwrap(), "car");
        assert!(matches!(prompt.read_line("> ", &[]), Err(SearchError::UserAbort)));
        assert_eq!(prompt.prompts.len(), 2);
    }
}
