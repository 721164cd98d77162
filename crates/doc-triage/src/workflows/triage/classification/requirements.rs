use super::super::domain::{DocumentRequirement, DocumentType};

/// Interchangeable requirements: the group is satisfied by any one valid member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternativeGroup {
    pub key: &'static str,
    pub description: &'static str,
    pub members: Vec<DocumentType>,
}

impl AlternativeGroup {
    pub fn contains(&self, document: DocumentType) -> bool {
        self.members.contains(&document)
    }
}

/// Checklist defined once at startup and shared by every classification call.
#[derive(Debug, Clone)]
pub struct RequirementCatalog {
    requirements: Vec<DocumentRequirement>,
    groups: Vec<AlternativeGroup>,
}

impl RequirementCatalog {
    pub fn new(requirements: Vec<DocumentRequirement>, groups: Vec<AlternativeGroup>) -> Self {
        Self {
            requirements,
            groups,
        }
    }

    pub fn standard() -> Self {
        let requirements = vec![
            DocumentRequirement {
                document_type: DocumentType::TaxCard,
                required: true,
                max_age_days: Some(90),
                can_auto_generate: true,
                blocking_if_missing: false,
                blocking_if_invalid: false,
                validation_rules: vec!["Issued within the last 90 days"],
            },
            DocumentRequirement {
                document_type: DocumentType::SocialContract,
                required: true,
                max_age_days: Some(1095),
                can_auto_generate: false,
                blocking_if_missing: true,
                blocking_if_invalid: true,
                validation_rules: vec![
                    "Latest consolidation carries a registration number",
                    "Issued within the last 3 years or replaced by a simplified certificate",
                ],
            },
            DocumentRequirement {
                document_type: DocumentType::PowerOfAttorney,
                required: false,
                max_age_days: None,
                can_auto_generate: false,
                blocking_if_missing: false,
                blocking_if_invalid: true,
                validation_rules: vec!["Notarized or digitally signed", "In force"],
            },
            DocumentRequirement {
                document_type: DocumentType::PartnerIds,
                required: true,
                max_age_days: None,
                can_auto_generate: false,
                blocking_if_missing: true,
                blocking_if_invalid: true,
                validation_rules: vec!["Legible and unexpired identity documents"],
            },
            DocumentRequirement {
                document_type: DocumentType::AddressProof,
                required: true,
                max_age_days: Some(90),
                can_auto_generate: false,
                blocking_if_missing: true,
                blocking_if_invalid: true,
                validation_rules: vec![
                    "Utility bill issued within 90 days",
                    "Held by the partner or backed by a marriage certificate",
                ],
            },
            financial(DocumentType::BalanceSheet),
            financial(DocumentType::FinancialStatements),
            financial(DocumentType::RevenueStatement),
            DocumentRequirement {
                document_type: DocumentType::CreditRelationshipDeclaration,
                required: false,
                max_age_days: None,
                can_auto_generate: false,
                blocking_if_missing: false,
                blocking_if_invalid: true,
                validation_rules: vec!["Signed credit relationship declaration"],
            },
            DocumentRequirement {
                document_type: DocumentType::VisitReport,
                required: false,
                max_age_days: None,
                can_auto_generate: false,
                blocking_if_missing: false,
                blocking_if_invalid: true,
                validation_rules: vec!["Dated and signed by the account manager"],
            },
            DocumentRequirement {
                document_type: DocumentType::CreditCommitteeMinutes,
                required: false,
                max_age_days: None,
                can_auto_generate: false,
                blocking_if_missing: false,
                blocking_if_invalid: true,
                validation_rules: vec![
                    "Company name present",
                    "Tax id present",
                    "Approved limit present",
                    "Approval date present",
                ],
            },
        ];

        let groups = vec![AlternativeGroup {
            key: "financial_statements_group",
            description: "At least one signed financial document (balance sheet, financial statements or revenue statement)",
            members: vec![
                DocumentType::BalanceSheet,
                DocumentType::FinancialStatements,
                DocumentType::RevenueStatement,
            ],
        }];

        Self::new(requirements, groups)
    }

    pub fn requirements(&self) -> &[DocumentRequirement] {
        &self.requirements
    }

    pub fn groups(&self) -> &[AlternativeGroup] {
        &self.groups
    }

    pub fn requirement(&self, document: DocumentType) -> Option<&DocumentRequirement> {
        self.requirements
            .iter()
            .find(|requirement| requirement.document_type == document)
    }
}

impl Default for RequirementCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

fn financial(document_type: DocumentType) -> DocumentRequirement {
    DocumentRequirement {
        document_type,
        required: false,
        max_age_days: None,
        can_auto_generate: false,
        blocking_if_missing: false,
        blocking_if_invalid: true,
        validation_rules: vec!["Dated and signed by the accountant or a legal representative"],
    }
}
