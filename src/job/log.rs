use tokio::sync::RwLock;

/// Append-only, ordered buffer of output lines for one stream.
///
/// Appends come from a single capture task; reads may happen concurrently
/// from any number of callers and always see a prefix of the final sequence.
#[derive(Debug, Default)]
pub struct LogBuffer {
    lines: RwLock<Vec<String>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, line: impl Into<String>) {
        self.lines.write().await.push(line.into());
    }

    /// Copy of all lines captured so far
    pub async fn snapshot(&self) -> Vec<String> {
        self.lines.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.lines.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lines.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn appends_preserve_order() {
        let log = LogBuffer::new();
        assert!(log.is_empty().await);

        log.append("first").await;
        log.append(String::from("second")).await;
        log.append("third").await;

        assert_eq!(log.len().await, 3);
        assert_eq!(log.snapshot().await, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn readers_see_growing_prefix() {
        let log = Arc::new(LogBuffer::new());

        let writer = {
            let log = log.clone();
            tokio::spawn(async move {
                for i in 0..500 {
                    log.append(i.to_string()).await;
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        let mut last_len = 0;
        while !writer.is_finished() {
            let snap = log.snapshot().await;
            assert!(snap.len() >= last_len);
            for (i, line) in snap.iter().enumerate() {
                assert_eq!(line, &i.to_string());
            }
            last_len = snap.len();
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        assert_eq!(log.len().await, 500);
    }
}
