//! User-facing guidance texts used when answers have to degrade.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::fallback::query::{detect_country, QueryType};

/// An authoritative external source worth pointing users at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSuggestion {
    pub name: String,
    pub url: String,
    pub description: String,
    pub relevance: String,
}

impl ResourceSuggestion {
    fn new(name: impl Into<String>, url: impl Into<String>, description: impl Into<String>, relevance: &str) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            description: description.into(),
            relevance: relevance.to_string(),
        }
    }
}

/// Official resources for a query type; country queries also get a customs search link
pub fn suggest_official_resources(query: &str, query_type: QueryType) -> Vec<ResourceSuggestion> {
    match query_type {
        QueryType::Tariff => vec![
            ResourceSuggestion::new(
                "WTO Tariff Database",
                "https://www.wto.org/english/tratop_e/tariffs_e/tariff_data_e.htm",
                "Official World Trade Organization tariff data and analysis",
                "Comprehensive global tariff information",
            ),
            ResourceSuggestion::new(
                "USITC DataWeb",
                "https://dataweb.usitc.gov/",
                "U.S. International Trade Commission trade and tariff data",
                "Detailed U.S. import/export statistics",
            ),
            ResourceSuggestion::new(
                "Trade.gov",
                "https://www.trade.gov/",
                "U.S. Department of Commerce trade resources",
                "Market research and trade regulations",
            ),
        ],
        QueryType::HsCode => vec![
            ResourceSuggestion::new(
                "WCO HS Nomenclature",
                "http://www.wcoomd.org/en/topics/nomenclature/overview.aspx",
                "World Customs Organization Harmonized System classification",
                "Official HS code classification system",
            ),
            ResourceSuggestion::new(
                "USITC HTS Search",
                "https://hts.usitc.gov/",
                "U.S. Harmonized Tariff Schedule search tool",
                "Search and browse U.S. tariff classifications",
            ),
            ResourceSuggestion::new(
                "Census Bureau Schedule B",
                "https://www.census.gov/foreign-trade/schedules/b/",
                "U.S. export classification codes",
                "Classification for U.S. exports",
            ),
        ],
        QueryType::Agreement => vec![
            ResourceSuggestion::new(
                "WTO Regional Trade Agreements",
                "https://www.wto.org/english/tratop_e/region_e/region_e.htm",
                "Database of regional trade agreements notified to the WTO",
                "Comprehensive FTA and RTA information",
            ),
            ResourceSuggestion::new(
                "USTR Trade Agreements",
                "https://ustr.gov/trade-agreements",
                "U.S. Trade Representative agreements and negotiations",
                "U.S. trade agreement details and texts",
            ),
            ResourceSuggestion::new(
                "Trade.gov FTA Portal",
                "https://www.trade.gov/fta",
                "U.S. Free Trade Agreement resources and guidance",
                "Practical FTA utilization information",
            ),
        ],
        QueryType::Country => {
            let mut suggestions = vec![
                ResourceSuggestion::new(
                    "WTO Country Profiles",
                    "https://www.wto.org/english/thewto_e/countries_e/countries_e.htm",
                    "Official WTO member country trade profiles",
                    "Trade policies and statistics by country",
                ),
                ResourceSuggestion::new(
                    "Trade.gov Country Commercial Guides",
                    "https://www.trade.gov/country-commercial-guides",
                    "Market conditions and opportunities by country",
                    "Detailed country market analysis",
                ),
            ];
            if let Some(country) = detect_country(query) {
                suggestions.push(ResourceSuggestion::new(
                    format!("{} Customs Authority", country),
                    format!(
                        "https://www.google.com/search?q={}+customs+authority",
                        country.replace(' ', "+")
                    ),
                    format!("Official customs authority for {}", country),
                    "Country-specific customs regulations",
                ));
            }
            suggestions
        }
        QueryType::General => vec![
            ResourceSuggestion::new(
                "WTO Resources",
                "https://www.wto.org/",
                "World Trade Organization official website",
                "Global trade rules and information",
            ),
            ResourceSuggestion::new(
                "Trade.gov",
                "https://www.trade.gov/",
                "U.S. Department of Commerce trade portal",
                "Comprehensive U.S. trade resources",
            ),
            ResourceSuggestion::new(
                "International Trade Centre",
                "https://www.intracen.org/",
                "Trade statistics and market analysis",
                "Trade data and business tools",
            ),
        ],
    }
}

pub fn format_resources(suggestions: &[ResourceSuggestion]) -> String {
    if suggestions.is_empty() {
        return String::new();
    }

    let mut out = String::from("\n\n**📚 Official Resources:**\n");
    for suggestion in suggestions {
        let _ = write!(
            out,
            "\n**{}**\n🔗 {}\nℹ️ {}\n",
            suggestion.name, suggestion.url, suggestion.description
        );
    }
    out
}

/// Canned per-type guidance for the manual Calculator and Database pages
pub fn pattern_guidance(query: &str, query_type: QueryType) -> String {
    match query_type {
        QueryType::Tariff => tariff_guidance(query),
        QueryType::HsCode => hs_code_guidance(query),
        QueryType::Agreement => agreement_guidance(query),
        QueryType::Country => match detect_country(query) {
            Some(country) => country_guidance(country),
            None => general_guidance(),
        },
        QueryType::General => general_guidance(),
    }
}

fn tariff_guidance(query: &str) -> String {
    let mut message = String::from(
        "I'm currently unable to process your tariff inquiry, but I can help guide you to the right information.\n\n",
    );
    message.push_str("**To find tariff rates manually:**\n");
    message.push_str("1. Go to the Calculator page\n");
    message.push_str("2. Select your origin and destination countries\n");
    message.push_str("3. Enter the HS code or product description\n");
    message.push_str("4. Click 'Calculate' to see both MFN and preferential rates\n\n");

    message.push_str("**Common tariff questions I can help with when available:**\n");
    message.push_str("• \"What's the tariff for importing [product] from [country] to [country]?\"\n");
    message.push_str("• \"Show me duty rates for HS code [code] between [countries]\"\n");
    message.push_str("• \"Compare tariff rates for [product] from different countries\"\n\n");

    message.push_str(&format_resources(&suggest_official_resources(query, QueryType::Tariff)));
    message.push_str(
        "\n\nPlease try your question again in a few moments, or use the Calculator for immediate results.",
    );
    message
}

fn hs_code_guidance(query: &str) -> String {
    let mut message = String::from(
        "I'm currently unable to help with HS code classification, but here's how you can find the right code:\n\n",
    );
    message.push_str("**To find HS codes manually:**\n");
    message.push_str("1. Go to the Database page\n");
    message.push_str("2. Use the product search to find similar items\n");
    message.push_str("3. Browse by category if you know the general product type\n");
    message.push_str("4. Check the detailed descriptions to find the best match\n\n");

    message.push_str("**Tips for better HS code searches:**\n");
    message.push_str("• Be specific about materials (e.g., 'cotton shirt' vs 'shirt')\n");
    message.push_str("• Include key characteristics (size, use, composition)\n");
    message.push_str("• Try different synonyms if the first search doesn't work\n\n");

    message.push_str("**Common HS code questions I can help with when available:**\n");
    message.push_str("• \"What's the HS code for [specific product description]?\"\n");
    message.push_str("• \"Find HS codes for products containing [material]\"\n");
    message.push_str("• \"Show me all codes in chapter [number]\"\n\n");

    message.push_str(&format_resources(&suggest_official_resources(query, QueryType::HsCode)));
    message.push_str("\n\nPlease try again in a moment, or use the Database search for immediate results.");
    message
}

fn agreement_guidance(query: &str) -> String {
    let mut message = String::from(
        "I'm currently unable to process your trade agreement inquiry, but here's how to find this information:\n\n",
    );
    message.push_str("**To explore trade agreements manually:**\n");
    message.push_str("1. Go to the Database page\n");
    message.push_str("2. Select a country from the country list\n");
    message.push_str("3. View the country's trade agreements and partners\n");
    message.push_str("4. Click on specific agreements for more details\n\n");

    message.push_str("**Common agreement questions I can help with when available:**\n");
    message.push_str("• \"What trade agreements does [country] have?\"\n");
    message.push_str("• \"Is there a trade agreement between [country1] and [country2]?\"\n");
    message.push_str("• \"Show me all FTA partners for [country]\"\n\n");

    message.push_str(&format_resources(&suggest_official_resources(query, QueryType::Agreement)));
    message.push_str(
        "\n\nPlease try your question again in a few moments, or browse the Database for immediate access to agreement information.",
    );
    message
}

fn country_guidance(country: &str) -> String {
    let mut message = format!(
        "I'm currently unable to process your inquiry about {}, but here's how to find this information:\n\n",
        country
    );
    message.push_str("**To explore country-specific trade data:**\n");
    message.push_str("1. Go to the Database page\n");
    let _ = writeln!(message, "2. Search for '{}' in the country list", country);
    message.push_str("3. View trade agreements, tariff schedules, and economic indicators\n");
    message.push_str("4. Use the Calculator for specific tariff calculations\n\n");

    let resources = suggest_official_resources(country, QueryType::Country);
    message.push_str(&format_resources(&resources));
    message.push_str(
        "\n\nPlease try your question again in a few moments, or explore the country data directly through the Database.",
    );
    message
}

/// Generic "can't answer right now" guidance
pub fn general_guidance() -> String {
    let mut message =
        String::from("I'm currently experiencing technical difficulties and can't process your request right now.\n\n");
    message.push_str("**While I'm unavailable, you can:**\n");
    message.push_str("• Use the **Calculator** to find tariff rates between countries\n");
    message.push_str("• Browse the **Database** to explore trade agreements and country data\n");
    message.push_str("• Visit the **Analytics** page for trade insights and trends\n\n");

    message.push_str("**When I'm back online, I can help you with:**\n");
    message.push_str("• Finding tariff rates for specific products and trade routes\n");
    message.push_str("• Identifying HS codes from product descriptions\n");
    message.push_str("• Explaining trade agreements between countries\n");
    message.push_str("• Comparing trade costs and opportunities\n\n");

    message.push_str("Please try your question again in a few moments. Thank you for your patience!");
    message
}

pub fn help_message() -> String {
    let mut message = String::from("Hello! I'm your AI Trade Assistant. I can help you with:\n\n");
    message.push_str("**🔍 Tariff Lookups**\n");
    message.push_str("• \"What's the tariff for importing coffee from Brazil to the US?\"\n");
    message.push_str("• \"Show me duty rates for electronics from China\"\n\n");

    message.push_str("**📋 HS Code Classification**\n");
    message.push_str("• \"What's the HS code for leather handbags?\"\n");
    message.push_str("• \"Find the classification for electric vehicles\"\n\n");

    message.push_str("**🤝 Trade Agreements**\n");
    message.push_str("• \"What trade agreements does Canada have?\"\n");
    message.push_str("• \"Is there an FTA between Japan and Australia?\"\n\n");

    message.push_str("**💡 Tips for better results:**\n");
    message.push_str("• Be specific about products and countries\n");
    message.push_str("• Ask one question at a time\n");
    message.push_str("• Include relevant details like materials or intended use\n\n");

    message.push_str("What would you like to know about international trade?");
    message
}

/// Response for a lookup that came back empty
pub fn data_not_found_response(query: &str, data_type: Option<&str>, reason: Option<&str>) -> String {
    let mut response = String::from("I couldn't find ");
    if let Some(data_type) = data_type {
        response.push_str(data_type);
        response.push(' ');
    }
    response.push_str("information for your query");
    if let Some(reason) = reason.filter(|r| !r.is_empty()) {
        let _ = write!(response, " ({})", reason);
    }
    response.push_str(".\n\n");

    response.push_str("**What this means:**\n");
    response.push_str("• The specific data you requested may not be in our database\n");
    response.push_str("• The product, country, or agreement might use different terminology\n");
    response.push_str("• The information might be too recent or specialized\n\n");

    response.push_str("**What you can try:**\n");
    let query_type = QueryType::classify(query);
    let tips: [&str; 4] = match query_type {
        QueryType::Tariff => [
            "Try searching with an HS code instead of product description",
            "Check if country names are spelled correctly (use full names)",
            "Look for similar products in the Database",
            "Use the Calculator with known HS codes",
        ],
        QueryType::HsCode => [
            "Try a more general product description",
            "Include material composition (e.g., 'cotton' or 'plastic')",
            "Browse by product category in the Database",
            "Try different synonyms or related terms",
        ],
        QueryType::Agreement => [
            "Verify country names are spelled correctly",
            "Try searching for both countries individually",
            "Check if the agreement uses a different name or acronym",
            "Browse all agreements in the Database",
        ],
        _ => [
            "Rephrase your question with more specific details",
            "Break complex questions into smaller parts",
            "Use the Database to explore available information",
            "Try the Calculator for manual lookups",
        ],
    };
    for tip in tips {
        let _ = writeln!(response, "• {}", tip);
    }

    response.push_str(&format_resources(&suggest_official_resources(query, query_type)));
    response.push_str(
        "\n\n💡 **Tip:** If you need current or specialized information, the official resources above are authoritative sources.",
    );
    response
}

/// Coarse error buckets used to pick wording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    Llm,
    ToolExecution,
    RateLimit,
    Validation,
    Unknown,
}

impl ErrorClass {
    pub fn classify(error: &str) -> Self {
        let lower = error.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["llm", "language model"]) {
            ErrorClass::Llm
        } else if has(&["tool", "execution"]) {
            ErrorClass::ToolExecution
        } else if has(&["rate limit", "too many requests"]) {
            ErrorClass::RateLimit
        } else if has(&["validation", "invalid"]) {
            ErrorClass::Validation
        } else {
            ErrorClass::Unknown
        }
    }
}

/// Plain-language explanation of a failure with next steps
pub fn explain_error(error: &str) -> String {
    let (intro, tips): (&str, [&str; 3]) = match ErrorClass::classify(error) {
        ErrorClass::Llm => (
            "I'm having trouble with my language processing right now. This usually resolves quickly.",
            [
                "Wait 1-2 minutes and try again",
                "Use the Calculator or Database for immediate results",
                "Try a simpler version of your question",
            ],
        ),
        ErrorClass::ToolExecution => (
            "I encountered an issue accessing the trade data you requested. The data sources might be temporarily unavailable.",
            [
                "Check if your query includes valid country names",
                "Try using standard country codes (US, CA, DE, etc.)",
                "Use the manual tools while I recover",
            ],
        ),
        ErrorClass::RateLimit => (
            "I'm receiving a high volume of requests right now. Please wait a moment before trying again.",
            [
                "Wait 30 seconds before trying again",
                "Use the Database to browse information manually",
                "Try during off-peak hours for faster responses",
            ],
        ),
        ErrorClass::Validation => (
            "I had trouble understanding your question. Could you please rephrase it or provide more details?",
            [
                "Include specific country names in your question",
                "Be more specific about the product or service",
                "Try: 'What is the tariff for [product] from [country] to [country]?'",
            ],
        ),
        ErrorClass::Unknown => (
            "I encountered an unexpected issue while processing your request.",
            [
                "Try rephrasing your question",
                "Use the Calculator or Database as alternatives",
                "Contact support if the problem persists",
            ],
        ),
    };

    let mut explanation = format!("{}\n\n**What you can try:**\n", intro);
    for tip in tips {
        let _ = writeln!(explanation, "• {}", tip);
    }
    explanation
}

const ALTERNATIVES: &[(&str, &str)] = &[
    ("calculator", "Use the Calculator for manual tariff lookups"),
    ("database", "Browse the Database for country and product information"),
    ("analytics", "Check Analytics for trade trends and insights"),
    ("cache", "Access cached information from previous queries"),
];

/// Manual surfaces still usable given what is down
pub fn available_alternatives(unavailable: &[String]) -> Vec<&'static str> {
    ALTERNATIVES
        .iter()
        .filter(|(surface, _)| !unavailable.iter().any(|u| u == surface))
        .map(|(_, text)| *text)
        .collect()
}

fn progressive_guidance(query_type: QueryType, unavailable: &[String]) -> String {
    let down = |surface: &str| unavailable.iter().any(|u| u == surface);
    let mut guidance = String::new();

    match query_type {
        QueryType::Tariff => {
            guidance.push_str("**For tariff information:**\n");
            if !down("calculator") {
                guidance.push_str("• Use the Calculator page for manual tariff lookups\n");
            }
            guidance.push_str("• Try rephrasing your question with specific country names\n");
            guidance.push_str("• Include HS codes if you know them\n");
        }
        QueryType::HsCode => {
            guidance.push_str("**For HS code classification:**\n");
            if !down("database") {
                guidance.push_str("• Browse the Database by product category\n");
            }
            guidance.push_str("• Try searching with different product descriptions\n");
            guidance.push_str("• Include material composition and intended use\n");
        }
        QueryType::Agreement => {
            guidance.push_str("**For trade agreement information:**\n");
            if !down("database") {
                guidance.push_str("• Check the Database country profiles\n");
            }
            guidance.push_str("• Look up specific country pairs\n");
            guidance.push_str("• Try searching for agreement acronyms (FTA, CPTPP, etc.)\n");
        }
        _ => {
            guidance.push_str("**General suggestions:**\n");
            guidance.push_str("• Try breaking your question into smaller parts\n");
            guidance.push_str("• Use specific country and product names\n");
            guidance.push_str("• Check back in a few minutes for full functionality\n");
        }
    }
    guidance
}

/// What is still usable, per-type hints, then a status footer
pub fn progressive_degradation_message(query: &str, unavailable: &[String]) -> String {
    let mut message = String::from("I'm experiencing some technical issues, but I can still help you:\n\n");

    let alternatives = available_alternatives(unavailable);
    if !alternatives.is_empty() {
        message.push_str("**Available options:**\n");
        for alternative in alternatives {
            let _ = writeln!(message, "• {}", alternative);
        }
        message.push('\n');
    }

    message.push_str(&progressive_guidance(QueryType::classify(query), unavailable));
    message.push_str("\n\n**System Status:**\n");
    message.push_str("Some services are temporarily unavailable. Please try again in a few minutes for full functionality.");
    message
}

/// Human name for a tool id; unknown ids are shown as-is
pub fn tool_display_name(tool: &str) -> &str {
    match tool {
        "tariff_lookup" => "Tariff Rate Lookup",
        "hs_code_finder" => "HS Code Classification",
        "agreement_tool" => "Trade Agreement Information",
        "compliance_analysis" => "Compliance Analysis",
        "market_intelligence" => "Market Intelligence",
        "risk_assessment" => "Risk Assessment",
        other => other,
    }
}

/// "Display Name (tool_id)" bullets, empty when nothing is down
pub fn unavailable_services(unavailable: &[String]) -> String {
    if unavailable.is_empty() {
        return String::new();
    }
    let mut section = String::from("\n\n**Currently unavailable services:**\n");
    for tool in unavailable {
        let _ = writeln!(section, "• {} ({})", tool_display_name(tool), tool);
    }
    section
}

/// Answer produced by a lower-priority tool, labeled as limited
pub fn degraded_answer(data: &str, unavailable: &[String]) -> String {
    let mut message = format!(
        "**Note:** I'm currently operating with limited functionality due to some services being unavailable.\n\n{}",
        data
    );

    message.push_str(&unavailable_services(unavailable));
    message.push_str("\n**What you can do:**\n");
    message.push_str("• Try again in a few minutes for full functionality\n");
    message.push_str("• Use the Calculator or Database for additional information\n");
    message.push_str("• Contact support if issues persist\n");
    message
}

/// Status banner for affected services
pub fn degradation_notice(affected: &[String], estimated_recovery: Option<&str>) -> String {
    let mut notice = String::from("**Service Status Update**\n\n");
    notice.push_str("We're currently experiencing issues with some services:\n\n");
    for service in affected {
        let _ = writeln!(notice, "• {} - Temporarily unavailable", tool_display_name(service));
    }

    notice.push_str("\n**What's still working:**\n");
    notice.push_str("• Basic tariff lookups\n");
    notice.push_str("• Manual calculator and database access\n");
    notice.push_str("• Conversation history and preferences\n");

    if let Some(eta) = estimated_recovery.filter(|e| !e.is_empty()) {
        let _ = write!(notice, "\n**Estimated recovery time:** {}", eta);
    }

    notice.push_str("\n\nWe apologize for any inconvenience and are working to restore full functionality.");
    notice
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_resources_include_customs_link() {
        let resources = suggest_official_resources("trade with the United Kingdom", QueryType::Country);
        assert_eq!(resources.len(), 3);
        assert_eq!(resources[2].name, "United Kingdom Customs Authority");
        assert_eq!(
            resources[2].url,
            "https://www.google.com/search?q=United+Kingdom+customs+authority"
        );
    }

    #[test]
    fn test_format_resources() {
        assert_eq!(format_resources(&[]), "");
        let formatted = format_resources(&suggest_official_resources("", QueryType::General));
        assert!(formatted.starts_with("\n\n**📚 Official Resources:**\n"));
        assert!(formatted.contains("🔗 https://www.intracen.org/"));
    }

    #[test]
    fn test_pattern_guidance_per_type() {
        let tariff = pattern_guidance("tariff on steel", QueryType::Tariff);
        assert!(tariff.contains("**To find tariff rates manually:**"));
        assert!(tariff.contains("WTO Tariff Database"));

        let country = pattern_guidance("news from japan", QueryType::Country);
        assert!(country.contains("inquiry about Japan"));
        assert!(country.contains("2. Search for 'Japan' in the country list"));
        assert!(country.contains("Japan Customs Authority"));
    }

    #[test]
    fn test_data_not_found() {
        let response = data_not_found_response("tariff on widgets", Some("tariff"), Some("no schedule"));
        assert!(response.starts_with("I couldn't find tariff information for your query (no schedule).\n\n"));
        assert!(response.contains("Try searching with an HS code instead of product description"));
        assert!(response.ends_with("the official resources above are authoritative sources."));

        let bare = data_not_found_response("hello", None, None);
        assert!(bare.starts_with("I couldn't find information for your query.\n\n"));
    }

    #[test]
    fn test_explain_error_classes() {
        assert_eq!(ErrorClass::classify("LLM backend timed out"), ErrorClass::Llm);
        assert_eq!(ErrorClass::classify("Too many requests"), ErrorClass::RateLimit);
        assert_eq!(ErrorClass::classify("invalid country"), ErrorClass::Validation);
        assert_eq!(ErrorClass::classify("boom"), ErrorClass::Unknown);

        let text = explain_error("rate limit hit");
        assert!(text.contains("**What you can try:**\n• Wait 30 seconds before trying again"));
    }

    #[test]
    fn test_alternatives_skip_unavailable() {
        let alternatives = available_alternatives(&["calculator".to_string()]);
        assert_eq!(alternatives.len(), 3);
        assert!(!alternatives.iter().any(|a| a.contains("Calculator")));
    }

    #[test]
    fn test_progressive_message() {
        let message = progressive_degradation_message("tariff for cars", &["tariff_lookup".to_string()]);
        assert!(message.contains("**Available options:**\n• Use the Calculator for manual tariff lookups"));
        assert!(message.contains("**For tariff information:**"));
        assert!(message.ends_with("Please try again in a few minutes for full functionality."));
    }

    #[test]
    fn test_degraded_answer_lists_services() {
        let answer = degraded_answer("HS 8504", &["tariff_lookup".to_string(), "custom_tool".to_string()]);
        assert!(answer.contains("operating with limited functionality"));
        assert!(answer.contains("• Tariff Rate Lookup (tariff_lookup)"));
        assert!(answer.contains("• custom_tool (custom_tool)"));
    }

    #[test]
    fn test_degradation_notice() {
        let notice = degradation_notice(&["risk_assessment".to_string()], Some("15 minutes"));
        assert!(notice.contains("• Risk Assessment - Temporarily unavailable"));
        assert!(notice.contains("**Estimated recovery time:** 15 minutes"));
        assert!(!degradation_notice(&[], None).contains("Estimated recovery"));
    }
}
