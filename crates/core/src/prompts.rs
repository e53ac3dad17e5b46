use crate::models::{ScoredChunk, SourceExcerpt, SourceMetadata, ThreadContext};

const SOURCE_SEPARATOR: &str = "\n\n---\n\n";
const ELLIPSIS: &str = "...";

pub fn source_label(source: &SourceMetadata) -> String {
    match source {
        SourceMetadata::Document {
            document_title,
            file_name,
            ..
        } => {
            let name = [document_title, file_name]
                .into_iter()
                .find(|name| !name.trim().is_empty())
                .map(String::as_str)
                .unwrap_or("Unknown");
            format!("Document: {name}")
        }
        SourceMetadata::ChatHistory {
            date_range,
            conversation_count,
            ..
        } => format!(
            "Chat History: {} ({conversation_count} messages)",
            date_range.start.format("%Y-%m-%d")
        ),
        SourceMetadata::ThreadArchive { thread_title, .. } => {
            let title = if thread_title.trim().is_empty() {
                "Unknown Thread"
            } else {
                thread_title
            };
            format!("Thread Archive: {title}")
        }
    }
}

pub fn build_context(chunks: &[ScoredChunk], max_chars: usize) -> String {
    let context = chunks
        .iter()
        .enumerate()
        .map(|(index, scored)| {
            format!(
                "[Source {} - {}]\n{}",
                index + 1,
                source_label(&scored.chunk.metadata.source),
                scored.chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join(SOURCE_SEPARATOR);

    if context.chars().count() > max_chars {
        let mut truncated: String = context.chars().take(max_chars).collect();
        truncated.push_str(ELLIPSIS);
        truncated
    } else {
        context
    }
}

fn thread_context_block(context: Option<&ThreadContext>) -> String {
    match context {
        Some(context) => format!(
            "Thread Context:\n- Thread: {}\n- Total Conversations: {}\n- Last Activity: {}\n\n",
            context.thread_title,
            context.conversation_count,
            context.last_activity.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => String::new(),
    }
}

pub fn grounded_prompt(query: &str, context: &str, thread: Option<&ThreadContext>) -> String {
    let mut prompt = String::from(
        "You are a helpful AI assistant that answers questions based on the provided context. \
         Use only the information from the sources below to answer the user's question. \
         If the sources don't contain enough information to answer the question, say so.\n\n",
    );
    prompt.push_str(&thread_context_block(thread));
    prompt.push_str(&format!(
        "Context Sources:\n{context}\n\nUser Question: {query}\n\n"
    ));
    prompt.push_str(
        "Instructions:\n\
         1. Answer the question based only on the provided context\n\
         2. Be concise but comprehensive\n\
         3. If you reference specific information, mention which source it came from\n\
         4. If the context doesn't contain enough information, acknowledge this limitation\n\
         5. Use a helpful and professional tone\n\
         6. Consider the thread context when providing relevant responses\n\n\
         Answer:",
    );
    prompt
}

pub fn fallback_prompt(query: &str, thread: Option<&ThreadContext>) -> String {
    let mut prompt = format!(
        "You are a helpful AI assistant. The user has asked a question, but I don't have any \
         relevant documents or previous conversations to reference for this specific query.\n\n\
         User Question: {query}\n\n"
    );
    prompt.push_str(&thread_context_block(thread));
    prompt.push_str(
        "Instructions:\n\
         1. Provide a helpful and informative response based on your general knowledge\n\
         2. Be honest about not having specific context from their documents or previous conversations\n\
         3. Offer to help them with related topics or suggest how they might find the information\n\
         4. Keep the response concise but helpful\n\
         5. Use a friendly and professional tone\n\n\
         Response:",
    );
    prompt
}

pub fn trim_excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= ELLIPSIS.len() {
        return text.chars().take(max_chars).collect();
    }
    let keep = max_chars - ELLIPSIS.len();
    let mut excerpt: String = text.chars().take(keep).collect();
    excerpt.push_str(ELLIPSIS);
    excerpt
}

pub fn excerpts(chunks: &[ScoredChunk], max_chars: usize) -> Vec<SourceExcerpt> {
    chunks
        .iter()
        .map(|scored| SourceExcerpt {
            content: trim_excerpt(&scored.chunk.content, max_chars),
            similarity: scored.similarity,
            source_type: scored.source_type,
            thread_id: scored.thread_id.clone(),
            metadata: scored.chunk.metadata.clone(),
        })
        .collect()
}
