//! Language-code normalization and default voice selection.
//!
//! Clients hand us whatever they have ("en", "EN-us", "es"); the engines
//! want full BCP-47 region codes. Unknown codes pass through unchanged so a
//! new engine-side language needs no gateway release.

/// Normalize a client-supplied language code to the regional form the
/// engines expect. Matching is case-insensitive on the input.
pub fn normalize_language_code(code: &str) -> String {
    let lowered = code.to_ascii_lowercase();
    let mapped = match lowered.as_str() {
        "en" | "en-us" => "en-US",
        "en-gb" => "en-GB",
        "es" | "es-es" => "es-ES",
        "es-mx" => "es-MX",
        "fr" | "fr-fr" => "fr-FR",
        "de" | "de-de" => "de-DE",
        "it" | "it-it" => "it-IT",
        "pt" | "pt-br" => "pt-BR",
        "pt-pt" => "pt-PT",
        "ja" | "ja-jp" => "ja-JP",
        "ko" | "ko-kr" => "ko-KR",
        "zh" | "zh-cn" => "zh-CN",
        "zh-tw" => "zh-TW",
        "ru" | "ru-ru" => "ru-RU",
        "ar" | "ar-sa" => "ar-SA",
        "hi" | "hi-in" => "hi-IN",
        "tr" | "tr-tr" => "tr-TR",
        "nl" | "nl-nl" => "nl-NL",
        "pl" | "pl-pl" => "pl-PL",
        "sv" | "sv-se" => "sv-SE",
        _ => return code.to_string(),
    };
    mapped.to_string()
}

/// Default synthesis voice for a target language, if we know one.
pub fn voice_for_language(language_code: &str) -> Option<&'static str> {
    let voice = match language_code {
        "en-US" => "en-US-Neural2-J",
        "en-GB" => "en-GB-Neural2-B",
        "es-ES" => "es-ES-Neural2-B",
        "es-MX" => "es-US-Neural2-B",
        "fr-FR" => "fr-FR-Neural2-B",
        "de-DE" => "de-DE-Neural2-B",
        "it-IT" => "it-IT-Neural2-A",
        "pt-BR" => "pt-BR-Neural2-B",
        "pt-PT" => "pt-PT-Neural2-B",
        "ja-JP" => "ja-JP-Neural2-C",
        "ko-KR" => "ko-KR-Neural2-B",
        "zh-CN" => "cmn-CN-Neural2-B",
        "zh-TW" => "cmn-TW-Neural2-B",
        "ru-RU" => "ru-RU-Neural2-B",
        "ar-SA" => "ar-XA-Neural2-B",
        "hi-IN" => "hi-IN-Neural2-B",
        "tr-TR" => "tr-TR-Neural2-B",
        "nl-NL" => "nl-NL-Neural2-B",
        "pl-PL" => "pl-PL-Neural2-B",
        "sv-SE" => "sv-SE-Neural2-A",
        _ => return None,
    };
    Some(voice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_codes_gain_region() {
        assert_eq!(normalize_language_code("en"), "en-US");
        assert_eq!(normalize_language_code("es"), "es-ES");
        assert_eq!(normalize_language_code("pt"), "pt-BR");
    }

    #[test]
    fn test_normalization_is_case_insensitive() {
        assert_eq!(normalize_language_code("EN-us"), "en-US");
        assert_eq!(normalize_language_code("Ja-JP"), "ja-JP");
    }

    #[test]
    fn test_unknown_codes_pass_through() {
        assert_eq!(normalize_language_code("xx-YY"), "xx-YY");
        assert_eq!(normalize_language_code(""), "");
    }

    #[test]
    fn test_voice_lookup() {
        assert_eq!(voice_for_language("es-ES"), Some("es-ES-Neural2-B"));
        assert_eq!(voice_for_language("xx-YY"), None);
    }
}
